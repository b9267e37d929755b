//! # Servo Channels
//!
//! PWM state for the two hobby-servo outputs. The kernel owns the
//! channel state and the pulse arithmetic; the GPIO pin itself is a
//! collaborator reached through [`ServoPins`].
//!
//! A hardware timer sweeps [`ServoBank::pwm_tick`] through a
//! 1000-interval frame: the pin rises at interval 0 and falls at
//! half the programmed pulse width, giving 0.6–2.4 ms pulses across
//! the 0°–180° range.

use crate::config::{SERVO_CHANNELS, SERVO_CYCLE_INTERVALS};
use crate::sync;

/// GPIO operations the servo service needs from its collaborator.
pub trait ServoPins {
    fn set(&mut self, channel: usize);
    fn clear(&mut self, channel: usize);
}

#[derive(Debug, Clone, Copy)]
struct ServoChannel {
    enabled: bool,
    pulse_intervals: u32,
}

/// All servo channels plus the frame position counter.
pub struct ServoBank {
    channels: [ServoChannel; SERVO_CHANNELS],
    interval: u32,
}

impl ServoBank {
    pub const fn new() -> Self {
        ServoBank {
            channels: [ServoChannel { enabled: false, pulse_intervals: 0 }; SERVO_CHANNELS],
            interval: 0,
        }
    }

    /// Enable or disable a channel. Disabling drops the pin at once.
    pub fn enable(&mut self, channel: usize, enabled: bool, pins: &mut impl ServoPins) -> i32 {
        if channel >= SERVO_CHANNELS {
            return -1;
        }
        self.channels[channel].enabled = enabled;
        if !enabled {
            pins.clear(channel);
        }
        0
    }

    /// Program a channel's target angle in degrees (0–180). The
    /// pulse width in timer intervals is `60 + angle`: 0.6 ms at 0°,
    /// 2.4 ms at 180°.
    pub fn set_angle(&mut self, channel: usize, angle: u32) -> i32 {
        if channel >= SERVO_CHANNELS || angle > 180 {
            return -1;
        }
        self.channels[channel].pulse_intervals = 60 + angle;
        0
    }

    /// One step of the PWM frame, driven by the servo timer
    /// interrupt.
    pub fn pwm_tick(&mut self, pins: &mut impl ServoPins) {
        for channel in 0..SERVO_CHANNELS {
            let state = self.channels[channel];
            if !state.enabled {
                continue;
            }
            if self.interval == 0 {
                pins.set(channel);
            } else if self.interval == state.pulse_intervals / 2 {
                pins.clear(channel);
            }
        }
        self.interval += 1;
        if self.interval >= SERVO_CYCLE_INTERVALS {
            self.interval = 0;
        }
    }
}

// ---------------------------------------------------------------------------
// Shared instance + syscall services
// ---------------------------------------------------------------------------

static mut BANK: ServoBank = ServoBank::new();

fn with_bank<R>(f: impl FnOnce(&mut ServoBank) -> R) -> R {
    sync::critical_section(|_| unsafe { f(&mut *core::ptr::addr_of_mut!(BANK)) })
}

/// `servo_enable` service: 0 on success, −1 on a bad channel.
pub fn sys_servo_enable(channel: u8, enabled: bool) -> i32 {
    with_bank(|bank| bank.enable(channel as usize, enabled, &mut crate::arch::ServoGpio))
}

/// `servo_set` service: 0 on success, −1 on a bad channel or angle.
pub fn sys_servo_set(channel: u8, angle: u32) -> i32 {
    with_bank(|bank| bank.set_angle(channel as usize, angle))
}

/// Servo timer interrupt body.
pub fn servo_timer_isr() {
    with_bank(|bank| bank.pwm_tick(&mut crate::arch::ServoGpio));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MockPins {
        sets: Vec<(usize, u32)>,
        clears: Vec<(usize, u32)>,
        now: u32,
    }

    impl ServoPins for MockPins {
        fn set(&mut self, channel: usize) {
            let now = self.now;
            self.sets.push((channel, now));
        }
        fn clear(&mut self, channel: usize) {
            let now = self.now;
            self.clears.push((channel, now));
        }
    }

    #[test]
    fn rejects_bad_channel_and_angle() {
        let mut bank = ServoBank::new();
        let mut pins = MockPins::default();
        assert_eq!(bank.enable(2, true, &mut pins), -1);
        assert_eq!(bank.set_angle(0, 181), -1);
        assert_eq!(bank.set_angle(2, 90), -1);
        assert_eq!(bank.set_angle(0, 180), 0);
    }

    #[test]
    fn disable_clears_the_pin() {
        let mut bank = ServoBank::new();
        let mut pins = MockPins::default();
        assert_eq!(bank.enable(1, true, &mut pins), 0);
        assert!(pins.clears.is_empty());
        assert_eq!(bank.enable(1, false, &mut pins), 0);
        assert_eq!(pins.clears, vec![(1, 0)]);
    }

    #[test]
    fn pwm_frame_raises_then_falls_at_half_pulse() {
        let mut bank = ServoBank::new();
        let mut pins = MockPins::default();
        bank.enable(0, true, &mut pins);
        bank.set_angle(0, 90); // pulse 150, falls at interval 75

        for now in 0..SERVO_CYCLE_INTERVALS {
            pins.now = now;
            bank.pwm_tick(&mut pins);
        }
        assert_eq!(pins.sets, vec![(0, 0)]);
        assert_eq!(pins.clears, vec![(0, 75)]);

        // The next frame starts over.
        pins.now = SERVO_CYCLE_INTERVALS;
        bank.pwm_tick(&mut pins);
        assert_eq!(pins.sets.len(), 2);
    }

    #[test]
    fn disabled_channels_stay_silent() {
        let mut bank = ServoBank::new();
        let mut pins = MockPins::default();
        bank.set_angle(0, 45);
        for _ in 0..SERVO_CYCLE_INTERVALS {
            bank.pwm_tick(&mut pins);
        }
        assert!(pins.sets.is_empty());
        assert!(pins.clears.is_empty());
    }
}
