use std::fmt;

use crate::entity::ViewEntity;

/// Presentation properties an [`Animation`] can drive. A closed set keeps
/// property dispatch exhaustive instead of stringly-typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnimProperty {
    ScreenX,
    ScreenY,
    Opacity,
    Scale,
    Rotation,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Track {
    pub start: f32,
    pub end: f32,
    pub current: f32,
}

/// Invoked exactly once when an animation finishes, after the animation is
/// already inactive, so a hook may install a replacement animation on the
/// same entity without recursing into the one that just completed.
pub type CompletionHook = Box<dyn FnOnce(&mut ViewEntity) + Send>;

/// A time-driven linear interpolator over one entity's presentation state.
/// At most one `Animation` is active per entity; installing a new one
/// discards the previous animation without firing its completion hook.
pub struct Animation {
    active: bool,
    duration_ms: f32,
    elapsed_ms: f32,
    tracks: Vec<(AnimProperty, Track)>,
    on_complete: Option<CompletionHook>,
}

impl fmt::Debug for Animation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Animation")
            .field("active", &self.active)
            .field("duration_ms", &self.duration_ms)
            .field("elapsed_ms", &self.elapsed_ms)
            .field("tracks", &self.tracks)
            .field("has_hook", &self.on_complete.is_some())
            .finish()
    }
}

impl Animation {
    pub fn new(duration_ms: f32) -> Self {
        Self {
            active: true,
            duration_ms,
            elapsed_ms: 0.0,
            tracks: Vec::new(),
            on_complete: None,
        }
    }

    pub fn with_track(mut self, property: AnimProperty, start: f32, end: f32) -> Self {
        self.tracks.push((
            property,
            Track {
                start,
                end,
                current: start,
            },
        ));
        self
    }

    pub fn with_completion(mut self, hook: CompletionHook) -> Self {
        self.on_complete = Some(hook);
        self
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn duration_ms(&self) -> f32 {
        self.duration_ms
    }

    pub fn elapsed_ms(&self) -> f32 {
        self.elapsed_ms
    }

    pub fn tracks(&self) -> &[(AnimProperty, Track)] {
        &self.tracks
    }

    /// Progress in `[0, 1]`. Non-positive durations complete immediately
    /// rather than dividing by zero.
    pub fn progress(&self) -> f32 {
        if self.duration_ms <= 0.0 {
            return 1.0;
        }
        (self.elapsed_ms / self.duration_ms).clamp(0.0, 1.0)
    }
}

/// Advances the entity's active animation by `delta_ms` wall-clock
/// milliseconds, writing interpolated values back onto the entity. Negative
/// deltas (inverted frame timestamps) are clamped to zero. Returns whether
/// the animation completed during this call.
pub fn advance(entity: &mut ViewEntity, delta_ms: f32) -> bool {
    let Some(mut animation) = entity.animation.take() else {
        return false;
    };
    if !animation.active {
        entity.animation = Some(animation);
        return false;
    }

    animation.elapsed_ms += delta_ms.max(0.0);
    let progress = animation.progress();
    for (property, track) in &mut animation.tracks {
        track.current = track.start + (track.end - track.start) * progress;
        apply_property(entity, *property, track.current);
    }

    if progress < 1.0 {
        entity.animation = Some(animation);
        return false;
    }

    animation.active = false;
    let hook = animation.on_complete.take();
    entity.animation = Some(animation);
    if let Some(hook) = hook {
        hook(entity);
    }
    true
}

fn apply_property(entity: &mut ViewEntity, property: AnimProperty, value: f32) {
    match property {
        AnimProperty::ScreenX => entity.screen_pos.x = value,
        AnimProperty::ScreenY => entity.screen_pos.y = value,
        AnimProperty::Opacity => entity.opacity = value,
        AnimProperty::Scale => entity.scale = value,
        AnimProperty::Rotation => entity.rotation = value,
    }
}
