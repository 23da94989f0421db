//! The seven ordered passes recorded for every active camera, plus the UI
//! and video-decode work recorded once per frame.
//!
//! Each pass records into its own command buffer, so the passes of one
//! camera run concurrently on the worker pool. Their order only matters at
//! submission, where [`FrameOutput`](crate::FrameOutput) lists them as
//! [`PassKind::ALL`] does.
//!
//! # Hooks
//!
//! Embedders register named callbacks in a [`HookRegistry`] and bind them
//! to passes through [`HookBinding`](crate::config::HookBinding). Names are
//! resolved once when the renderer is built. For the draw, light and
//! forward passes hooks run with the pass's target bound; for the shadow
//! and post passes they run with nothing bound and must bind what they draw
//! into.

mod geometry;
mod lighting;
mod post;
mod shadow;
pub(crate) mod ui;
pub(crate) mod video;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use umbra_core::math::Frustum;

use crate::command::RenderCommand;
use crate::config::HookBinding;
use crate::error::GraphicsError;
use crate::resources::CameraHandle;

pub use lighting::LightPrograms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    DirectionalShadow,
    PointShadow,
    SpotShadow,
    /// Opaque geometry into the G-buffer.
    Draw,
    /// Deferred light accumulation.
    Light,
    /// Blended geometry and particles.
    Forward,
    Post,
}

impl PassKind {
    /// Submission order.
    pub const ALL: [Self; 7] = [
        Self::DirectionalShadow,
        Self::PointShadow,
        Self::SpotShadow,
        Self::Draw,
        Self::Light,
        Self::Forward,
        Self::Post,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::DirectionalShadow => "directional_shadow",
            Self::PointShadow => "point_shadow",
            Self::SpotShadow => "spot_shadow",
            Self::Draw => "draw",
            Self::Light => "light",
            Self::Forward => "forward",
            Self::Post => "post",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a hook is invoked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassContext {
    pub pass: PassKind,
    pub camera: CameraHandle,
    /// Position of the camera among this frame's active cameras.
    pub camera_index: usize,
}

/// A user callback run at the start or end of a pass.
pub type PassHook =
    Arc<dyn Fn(&mut RenderCommand<'_>, &PassContext) -> Result<(), GraphicsError> + Send + Sync>;

/// Named hooks available to [`HookBinding`]s.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: HashMap<String, PassHook>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        hook: impl Fn(&mut RenderCommand<'_>, &PassContext) -> Result<(), GraphicsError>
        + Send
        + Sync
        + 'static,
    ) -> &mut Self {
        self.hooks.insert(name.into(), Arc::new(hook));
        self
    }

    pub fn get(&self, name: &str) -> Option<&PassHook> {
        self.hooks.get(name)
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.hooks.keys()).finish()
    }
}

/// Hooks bound to each pass, resolved from the configuration.
#[derive(Clone, Default)]
pub(crate) struct PassHooks {
    pre: [Vec<PassHook>; 7],
    post: [Vec<PassHook>; 7],
}

impl PassHooks {
    pub(crate) fn resolve(
        bindings: &[HookBinding],
        registry: &HookRegistry,
    ) -> Result<Self, GraphicsError> {
        let mut hooks = Self::default();
        for binding in bindings {
            let pass = PassKind::from_name(&binding.pass).ok_or_else(|| {
                GraphicsError::Config(format!("hook bound to unknown pass '{}'", binding.pass))
            })?;
            let lookup = |name: &String| {
                registry.get(name).cloned().ok_or_else(|| {
                    GraphicsError::Config(format!("hook '{}' is not registered", name))
                })
            };
            if let Some(name) = &binding.pre {
                hooks.pre[pass.index()].push(lookup(name)?);
            }
            if let Some(name) = &binding.post {
                hooks.post[pass.index()].push(lookup(name)?);
            }
        }
        Ok(hooks)
    }

    pub(crate) fn run_pre(
        &self,
        cmd: &mut RenderCommand<'_>,
        ctx: &PassContext,
    ) -> Result<(), GraphicsError> {
        self.pre[ctx.pass.index()]
            .iter()
            .try_for_each(|hook| hook(cmd, ctx))
    }

    pub(crate) fn run_post(
        &self,
        cmd: &mut RenderCommand<'_>,
        ctx: &PassContext,
    ) -> Result<(), GraphicsError> {
        self.post[ctx.pass.index()]
            .iter()
            .try_for_each(|hook| hook(cmd, ctx))
    }

    pub(crate) fn count(&self) -> usize {
        self.pre.iter().chain(self.post.iter()).map(Vec::len).sum()
    }
}

impl fmt::Debug for PassHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassHooks")
            .field("count", &self.count())
            .finish()
    }
}

/// Record `ctx.pass` into `cmd`. Leaves the command flushed.
pub(crate) fn record(
    cmd: &mut RenderCommand<'_>,
    ctx: &PassContext,
    hooks: &PassHooks,
) -> Result<(), GraphicsError> {
    match ctx.pass {
        PassKind::DirectionalShadow => shadow::record_directional(cmd, ctx, hooks)?,
        PassKind::PointShadow => shadow::record_point(cmd, ctx, hooks)?,
        PassKind::SpotShadow => shadow::record_spot(cmd, ctx, hooks)?,
        PassKind::Draw => geometry::record_draw(cmd, ctx, hooks)?,
        PassKind::Light => lighting::record(cmd, ctx, hooks)?,
        PassKind::Forward => geometry::record_forward(cmd, ctx, hooks)?,
        PassKind::Post => post::record(cmd, ctx, hooks)?,
    }
    cmd.flush();
    Ok(())
}

/// Frustum of the command's camera over the bound target.
fn camera_frustum(cmd: &RenderCommand<'_>) -> Option<Frustum> {
    let camera = cmd.camera()?;
    let world = cmd.camera_world()?;
    let extent = cmd.extent()?;
    Some(Frustum::from_view_proj(
        camera.projection(extent) * world.inverse(),
    ))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("directional_shadow", Some(PassKind::DirectionalShadow))]
    #[case("draw", Some(PassKind::Draw))]
    #[case("post", Some(PassKind::Post))]
    #[case("Draw", None)]
    #[case("gbuffer", None)]
    fn test_pass_names(#[case] name: &str, #[case] expected: Option<PassKind>) {
        assert_eq!(PassKind::from_name(name), expected);
    }

    #[test]
    fn test_pass_order_matches_indices() {
        for (i, kind) in PassKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn test_resolve_hooks() {
        let mut registry = HookRegistry::new();
        registry.register("sky", |_, _| Ok(()));

        let bindings = vec![HookBinding {
            pass: "draw".to_string(),
            pre: Some("sky".to_string()),
            post: None,
        }];
        let hooks = PassHooks::resolve(&bindings, &registry).unwrap();
        assert_eq!(hooks.count(), 1);
        assert_eq!(hooks.pre[PassKind::Draw.index()].len(), 1);
    }

    #[rstest]
    #[case("draw", "missing")]
    #[case("bloom", "sky")]
    fn test_resolve_rejects_unknown(#[case] pass: &str, #[case] hook: &str) {
        let mut registry = HookRegistry::new();
        registry.register("sky", |_, _| Ok(()));
        let bindings = vec![HookBinding {
            pass: pass.to_string(),
            pre: None,
            post: Some(hook.to_string()),
        }];
        assert!(matches!(
            PassHooks::resolve(&bindings, &registry),
            Err(GraphicsError::Config(_))
        ));
    }
}
