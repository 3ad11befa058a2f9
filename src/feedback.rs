// SPDX-License-Identifier: GPL-3.0-only

//! Confirmation feedback for accepted scans
//!
//! A short tone and a haptic pulse acknowledge each accepted barcode. Both
//! run on the blocking pool and never delay delivery of the scan itself.
//!
//! Haptics use a vibration motor exposed through the LED class at
//! `/sys/class/leds/*vibrator*`, as found on Linux phones.

use crate::constants::{BEEP_DURATION, BEEP_FREQUENCY_HZ, BEEP_VOLUME};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Confirmation tone parameters
///
/// Handed to every [`ScanFeedback::beep`]. Outputs that can synthesise audio
/// play this tone; [`SystemFeedback`] rings the terminal bell, which has no
/// pitch or volume, and ignores it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub frequency_hz: u32,
    pub duration: Duration,
    /// 0.0 to 1.0
    pub volume: f32,
}

impl Default for Tone {
    fn default() -> Self {
        Self {
            frequency_hz: BEEP_FREQUENCY_HZ,
            duration: BEEP_DURATION,
            volume: BEEP_VOLUME,
        }
    }
}

/// Output devices for confirmation feedback.
///
/// Both calls may block; the dispatcher keeps them off async tasks.
pub trait ScanFeedback: Send + Sync {
    fn beep(&self, tone: Tone);
    fn vibrate(&self, pulse: Duration);
}

/// Feedback that does nothing, for headless hosts
pub struct SilentFeedback;

impl ScanFeedback for SilentFeedback {
    fn beep(&self, _tone: Tone) {}
    fn vibrate(&self, _pulse: Duration) {}
}

/// A vibration motor discovered via sysfs
#[derive(Debug, Clone)]
pub struct VibratorDevice {
    path: PathBuf,
    max_brightness: u32,
}

impl VibratorDevice {
    /// First writable `*vibrator*` LED under `/sys/class/leds`
    pub fn discover() -> Option<Self> {
        Self::discover_in(Path::new("/sys/class/leds"))
    }

    fn discover_in(leds_dir: &Path) -> Option<Self> {
        let entries = match std::fs::read_dir(leds_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(error = %e, "No LED class directory, haptics disabled");
                return None;
            }
        };

        let mut names: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.contains("vibrator"))
            })
            .collect();
        names.sort();

        for path in names {
            let max_brightness = std::fs::read_to_string(path.join("max_brightness"))
                .ok()
                .and_then(|s| s.trim().parse::<u32>().ok())
                .filter(|v| *v > 0);
            let Some(max_brightness) = max_brightness else {
                continue;
            };

            if let Err(e) = std::fs::OpenOptions::new()
                .write(true)
                .open(path.join("brightness"))
            {
                warn!(path = %path.display(), error = %e, "Vibrator not writable");
                continue;
            }

            info!(path = %path.display(), max_brightness, "Discovered vibrator");
            return Some(Self {
                path,
                max_brightness,
            });
        }
        None
    }

    /// Run the motor for `pulse`, blocking the calling thread
    pub fn pulse(&self, pulse: Duration) -> io::Result<()> {
        let brightness = self.path.join("brightness");
        std::fs::write(&brightness, self.max_brightness.to_string())?;
        std::thread::sleep(pulse);
        std::fs::write(&brightness, "0")
    }
}

/// Terminal bell for the tone, sysfs vibrator for haptics
pub struct SystemFeedback {
    vibrator: Option<VibratorDevice>,
}

impl SystemFeedback {
    pub fn detect() -> Self {
        Self {
            vibrator: VibratorDevice::discover(),
        }
    }
}

impl ScanFeedback for SystemFeedback {
    fn beep(&self, _tone: Tone) {
        // A terminal bell has no pitch or volume control
        let mut stderr = io::stderr();
        let _ = stderr.write_all(b"\x07");
        let _ = stderr.flush();
    }

    fn vibrate(&self, pulse: Duration) {
        let Some(vibrator) = &self.vibrator else {
            return;
        };
        if let Err(e) = vibrator.pulse(pulse) {
            warn!(error = %e, "Haptic pulse failed");
        }
    }
}

/// Applies user settings and dispatches feedback without blocking the caller
#[derive(Clone)]
pub struct FeedbackDispatcher {
    output: Arc<dyn ScanFeedback>,
    tone: Tone,
    pulse: Duration,
    sound_enabled: bool,
    haptics_enabled: bool,
}

impl FeedbackDispatcher {
    pub fn new(output: Arc<dyn ScanFeedback>, pulse: Duration) -> Self {
        Self {
            output,
            tone: Tone::default(),
            pulse,
            sound_enabled: true,
            haptics_enabled: true,
        }
    }

    pub fn silent() -> Self {
        Self::new(Arc::new(SilentFeedback), Duration::ZERO)
    }

    pub fn with_settings(mut self, sound_enabled: bool, haptics_enabled: bool) -> Self {
        self.sound_enabled = sound_enabled;
        self.haptics_enabled = haptics_enabled;
        self
    }

    /// Acknowledge an accepted scan. Returns immediately.
    pub fn confirm(&self) {
        if !self.sound_enabled && !self.haptics_enabled {
            return;
        }
        let output = Arc::clone(&self.output);
        let (tone, pulse) = (self.tone, self.pulse);
        let (sound, haptics) = (self.sound_enabled, self.haptics_enabled);
        let work = move || {
            if sound {
                output.beep(tone);
            }
            if haptics && !pulse.is_zero() {
                output.vibrate(pulse);
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(work);
            }
            Err(_) => {
                std::thread::spawn(work);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<&'static str>>,
    }

    impl ScanFeedback for Recorder {
        fn beep(&self, tone: Tone) {
            assert_eq!(tone.frequency_hz, 1800);
            self.events.lock().unwrap().push("beep");
        }
        fn vibrate(&self, _pulse: Duration) {
            self.events.lock().unwrap().push("vibrate");
        }
    }

    #[test]
    fn test_default_tone() {
        let tone = Tone::default();
        assert_eq!(tone.frequency_hz, 1800);
        assert_eq!(tone.duration, Duration::from_millis(150));
        assert_eq!(tone.volume, 0.3);
    }

    #[tokio::test]
    async fn test_confirm_respects_settings() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = FeedbackDispatcher::new(recorder.clone(), Duration::from_millis(100))
            .with_settings(false, true);
        dispatcher.confirm();

        for _ in 0..100 {
            if !recorder.events.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*recorder.events.lock().unwrap(), vec!["vibrate"]);
    }

    #[test]
    fn test_discover_ignores_non_vibrators() {
        let dir = std::env::temp_dir().join(format!("hyperpos-leds-{}", uuid::Uuid::new_v4()));
        let led = dir.join("white:flash");
        std::fs::create_dir_all(&led).unwrap();
        std::fs::write(led.join("max_brightness"), "255").unwrap();
        std::fs::write(led.join("brightness"), "0").unwrap();
        assert!(VibratorDevice::discover_in(&dir).is_none());

        let motor = dir.join("vibrator");
        std::fs::create_dir_all(&motor).unwrap();
        std::fs::write(motor.join("max_brightness"), "1").unwrap();
        std::fs::write(motor.join("brightness"), "0").unwrap();
        let found = VibratorDevice::discover_in(&dir).unwrap();
        found.pulse(Duration::from_millis(1)).unwrap();
        assert_eq!(std::fs::read_to_string(motor.join("brightness")).unwrap(), "0");

        let _ = std::fs::remove_dir_all(dir);
    }
}
