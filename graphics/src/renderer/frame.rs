//! Per-frame orchestration.

use std::sync::Arc;

use rayon::prelude::*;

use crate::backend::GpuCommandBuffer;
use crate::command::{CommandSlot, CommandStats, RenderCommand};
use crate::error::GraphicsError;
use crate::passes::{self, PassContext, PassKind};
use crate::resources::{
    CameraHandle, CanvasHandle, CanvasRenderer, TimeUniform, VideoTexture, VideoTextureHandle,
};

use super::Renderer;

/// What a command buffer of a frame holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandLabel {
    VideoDecode,
    Pass {
        camera: CameraHandle,
        pass: PassKind,
    },
    Canvas(CanvasHandle),
}

#[derive(Debug, Clone)]
pub struct FrameCommandBuffer {
    pub label: CommandLabel,
    pub buffer: Arc<GpuCommandBuffer>,
    pub stats: CommandStats,
}

/// Command buffers of one frame, in submission order: video decode (when
/// any video is active), then the seven passes of each camera, then the UI
/// canvases.
#[derive(Debug, Clone, Default)]
pub struct FrameOutput {
    pub entries: Vec<FrameCommandBuffer>,
    /// Deferred resources dropped at the start of the frame.
    pub released: usize,
}

impl FrameOutput {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn command_buffers(&self) -> impl Iterator<Item = &Arc<GpuCommandBuffer>> + '_ {
        self.entries.iter().map(|entry| &entry.buffer)
    }

    /// Raw handles for the submission layer, in order.
    pub fn native_handles(&self) -> Vec<u64> {
        self.command_buffers()
            .map(|buffer| buffer.native_handle())
            .collect()
    }

    /// The buffer `pass` recorded for `camera`.
    pub fn pass(&self, camera: CameraHandle, pass: PassKind) -> Option<&FrameCommandBuffer> {
        self.entries
            .iter()
            .find(|entry| entry.label == CommandLabel::Pass { camera, pass })
    }
}

enum Job {
    Decode(Vec<(VideoTextureHandle, VideoTexture)>),
    Pass(PassContext),
    Canvas(CanvasHandle, CanvasRenderer),
}

impl Job {
    fn label(&self) -> CommandLabel {
        match self {
            Self::Decode(_) => CommandLabel::VideoDecode,
            Self::Pass(ctx) => CommandLabel::Pass {
                camera: ctx.camera,
                pass: ctx.pass,
            },
            Self::Canvas(handle, _) => CommandLabel::Canvas(*handle),
        }
    }

    fn camera(&self) -> CameraHandle {
        match self {
            Self::Pass(ctx) => ctx.camera,
            _ => CameraHandle::NULL,
        }
    }
}

impl Renderer {
    /// Record one frame.
    ///
    /// `frame_index` selects the flight frame; the embedder must have waited
    /// for the GPU to finish the previous use of that slot. Returns the
    /// command buffers to submit, in order. The first recording error aborts
    /// the frame.
    pub fn update(
        &self,
        delta: f64,
        time: f64,
        frame_index: u32,
    ) -> Result<FrameOutput, GraphicsError> {
        let frame = frame_index % self.config.flight_frames;
        let backend = self.backend();

        let released = self.deletion.begin_frame(frame);
        self.descriptors.reset(backend, frame)?;
        self.transient.reset(frame);

        for (_, program) in self.programs.read().iter() {
            program.refresh_uniform(backend, frame)?;
        }
        let time_uniform = TimeUniform {
            time: time as f32,
            delta: delta as f32,
            frame: frame_index,
            _padding: 0,
        };
        backend.write_buffer(self.time_ubo(frame), 0, bytemuck::bytes_of(&time_uniform))?;

        let jobs = self.collect_jobs();
        if jobs.is_empty() {
            return Ok(FrameOutput {
                entries: Vec::new(),
                released,
            });
        }

        let mut slots = self.frames[frame as usize].lock();
        if slots.len() < jobs.len() {
            log::debug!(
                "Growing command slots of frame {} from {} to {}",
                frame,
                slots.len(),
                jobs.len()
            );
            while slots.len() < jobs.len() {
                slots.push(CommandSlot::new(backend)?);
            }
        }
        let slots: &[CommandSlot] = &slots;

        let entries = self.pool.install(|| {
            jobs.par_iter()
                .zip(slots.par_iter())
                .map(|(job, slot)| self.record_job(job, slot, frame, time as f32))
                .collect::<Result<Vec<_>, GraphicsError>>()
        })?;

        log::trace!(
            "Frame {} recorded {} command buffers",
            frame_index,
            entries.len()
        );
        Ok(FrameOutput { entries, released })
    }

    fn collect_jobs(&self) -> Vec<Job> {
        let videos: Vec<_> = self
            .videos
            .read()
            .iter()
            .filter(|(_, video)| video.active)
            .map(|(handle, video)| (handle, video.clone()))
            .collect();
        let cameras: Vec<_> = self
            .cameras
            .read()
            .iter()
            .filter(|(_, camera)| camera.is_renderable())
            .map(|(handle, _)| handle)
            .collect();
        let canvases: Vec<_> = self
            .canvases
            .read()
            .iter()
            .filter(|(_, canvas)| canvas.active)
            .map(|(handle, canvas)| (handle, *canvas))
            .collect();

        let mut jobs = Vec::with_capacity(1 + cameras.len() * PassKind::ALL.len() + canvases.len());
        if !videos.is_empty() {
            jobs.push(Job::Decode(videos));
        }
        for (camera_index, camera) in cameras.into_iter().enumerate() {
            jobs.extend(PassKind::ALL.into_iter().map(|pass| {
                Job::Pass(PassContext {
                    pass,
                    camera,
                    camera_index,
                })
            }));
        }
        jobs.extend(
            canvases
                .into_iter()
                .map(|(handle, canvas)| Job::Canvas(handle, canvas)),
        );
        jobs
    }

    fn record_job(
        &self,
        job: &Job,
        slot: &CommandSlot,
        frame: u32,
        time: f32,
    ) -> Result<FrameCommandBuffer, GraphicsError> {
        slot.reset(self.backend())?;
        let mut cmd = RenderCommand::begin(self, slot, frame, time, job.camera())?;
        match job {
            Job::Decode(videos) => {
                passes::video::record_decode(&mut cmd, videos)?;
            }
            Job::Pass(ctx) => passes::record(&mut cmd, ctx, &self.hooks)?,
            Job::Canvas(handle, canvas) => passes::ui::record_canvas(&mut cmd, *handle, canvas)?,
        }
        let stats = cmd.finish()?;
        Ok(FrameCommandBuffer {
            label: job.label(),
            buffer: slot.command_buffer().clone(),
            stats,
        })
    }
}
