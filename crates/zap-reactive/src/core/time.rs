/// Fixed timestep accumulator.
/// Drives the physics tick at a consistent rate regardless of frame time.
#[derive(Debug, Clone)]
pub struct FixedTimestep {
    /// The fixed delta time per step.
    dt: f64,
    /// Accumulated time from variable frame deltas.
    accumulator: f64,
    /// Steps allowed per frame before the backlog is dropped.
    max_steps: u32,
}

impl FixedTimestep {
    pub fn new(dt: f64) -> Self {
        Self::with_max_steps(dt, 10)
    }

    pub fn with_max_steps(dt: f64, max_steps: u32) -> Self {
        Self {
            dt,
            accumulator: 0.0,
            max_steps: max_steps.max(1),
        }
    }

    /// Add frame time to the accumulator. Returns the number of fixed steps to run.
    pub fn accumulate(&mut self, frame_dt: f64) -> u32 {
        self.accumulator += frame_dt;
        // Cap to prevent a spiral of death
        self.accumulator = self.accumulator.min(self.dt * self.max_steps as f64);
        let steps = (self.accumulator / self.dt) as u32;
        self.accumulator -= steps as f64 * self.dt;
        steps
    }

    /// Interpolation alpha between physics steps (0.0 to 1.0).
    pub fn alpha(&self) -> f64 {
        self.accumulator / self.dt
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }
}

/// Timing of one host frame, as seen by behaviors and timers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTiming {
    /// Scaled process delta (0 while paused).
    pub delta: f64,
    /// Number of physics steps to run this frame.
    pub physics_steps: u32,
    /// Fixed delta of each physics step.
    pub physics_dt: f64,
}

/// Host frame clock: applies time scale and pause to real frame time and
/// counts process frames and physics steps.
#[derive(Debug, Clone)]
pub struct FrameClock {
    timestep: FixedTimestep,
    time_scale: f64,
    paused: bool,
    frames: u64,
    physics_steps: u64,
    elapsed: f64,
}

impl FrameClock {
    pub fn new(physics_dt: f64, max_physics_steps: u32) -> Self {
        Self {
            timestep: FixedTimestep::with_max_steps(physics_dt, max_physics_steps),
            time_scale: 1.0,
            paused: false,
            frames: 0,
            physics_steps: 0,
            elapsed: 0.0,
        }
    }

    /// Advance by one host frame of `real_dt` seconds.
    pub fn advance(&mut self, real_dt: f64) -> FrameTiming {
        let delta = if self.paused {
            0.0
        } else {
            real_dt.max(0.0) * self.time_scale
        };
        let physics_steps = if self.paused {
            0
        } else {
            self.timestep.accumulate(delta)
        };
        self.frames += 1;
        self.physics_steps += physics_steps as u64;
        self.elapsed += delta;
        FrameTiming {
            delta,
            physics_steps,
            physics_dt: self.timestep.dt(),
        }
    }

    pub fn set_time_scale(&mut self, scale: f64) {
        self.time_scale = scale.max(0.0);
    }

    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Process frames advanced so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn physics_steps(&self) -> u64 {
        self.physics_steps
    }

    /// Scaled host time elapsed so far.
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn alpha(&self) -> f64 {
        self.timestep.alpha()
    }
}
