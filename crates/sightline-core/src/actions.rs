//! Foreground actions on a single process.
//!
//! Each destructive action copies its target, takes the process feed's
//! [`ActionGuard`] for its whole duration (confirmation included) and releases
//! it on every exit path.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TelemetryError};
use crate::guard::ActionGuard;
use crate::provider::ProcessControl;
use crate::record::ProcessRecord;

/// Pids at or below this belong to the kernel and are never acted on.
pub const LAST_PROTECTED_PID: u32 = 4;

pub fn can_act_on(pid: u32) -> bool {
    pid > LAST_PROTECTED_PID
}

/// Scheduling priority, expressed as a priority class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriorityLevel {
    Realtime,
    High,
    AboveNormal,
    Normal,
    BelowNormal,
    Low,
}

impl PriorityLevel {
    pub const ALL: [Self; 6] = [
        Self::Realtime,
        Self::High,
        Self::AboveNormal,
        Self::Normal,
        Self::BelowNormal,
        Self::Low,
    ];

    pub fn class(self) -> u32 {
        match self {
            Self::Realtime => 0x100,
            Self::High => 0x80,
            Self::AboveNormal => 0x8000,
            Self::Normal => 0x20,
            Self::BelowNormal => 0x4000,
            Self::Low => 0x40,
        }
    }

    pub fn from_class(class: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.class() == class)
    }

    /// Parse a level name. Anything unrecognised means `Normal`.
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or(Self::Normal)
    }

    /// Unix nice value used where priority classes do not exist.
    pub fn nice(self) -> i32 {
        match self {
            Self::Realtime => -20,
            Self::High => -10,
            Self::AboveNormal => -5,
            Self::Normal => 0,
            Self::BelowNormal => 5,
            Self::Low => 19,
        }
    }

    pub fn from_nice(nice: i32) -> Self {
        match nice {
            i32::MIN..=-16 => Self::Realtime,
            -15..=-6 => Self::High,
            -5..=-1 => Self::AboveNormal,
            0 => Self::Normal,
            1..=10 => Self::BelowNormal,
            _ => Self::Low,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Realtime => "Realtime",
            Self::High => "High",
            Self::AboveNormal => "AboveNormal",
            Self::Normal => "Normal",
            Self::BelowNormal => "BelowNormal",
            Self::Low => "Low",
        }
    }
}

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PriorityLevel {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self> {
        let folded: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|level| level.label().to_ascii_lowercase() == folded)
            .ok_or_else(|| TelemetryError::ActionRejected(format!("unknown priority level '{s}'")))
    }
}

/// How a confirmable action ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Done,
    Declined,
}

/// Process actions bound to a provider and the process feed's guard.
#[derive(Clone)]
pub struct ProcessActions {
    control: Arc<dyn ProcessControl>,
    guard: ActionGuard,
}

impl fmt::Debug for ProcessActions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessActions")
            .field("guard_held", &self.guard.is_held())
            .finish()
    }
}

impl ProcessActions {
    pub fn new(control: Arc<dyn ProcessControl>, guard: ActionGuard) -> Self {
        Self { control, guard }
    }

    pub fn guard(&self) -> &ActionGuard {
        &self.guard
    }

    fn check_target(target: &ProcessRecord) -> Result<()> {
        if can_act_on(target.pid) {
            Ok(())
        } else {
            Err(TelemetryError::ActionRejected(format!(
                "pid {} is protected",
                target.pid
            )))
        }
    }

    fn busy() -> TelemetryError {
        TelemetryError::ActionRejected("another action is already in progress".into())
    }

    /// Ask `confirm` and, if it agrees, kill the process.
    ///
    /// The feed stays frozen while `confirm` blocks, so the record it is shown
    /// cannot be replaced or moved underneath it.
    pub fn terminate<F>(&self, target: &ProcessRecord, confirm: F) -> Result<ActionOutcome>
    where
        F: FnOnce(&ProcessRecord) -> bool,
    {
        Self::check_target(target)?;
        let target = target.clone();
        let _lease = self.guard.try_acquire().ok_or_else(Self::busy)?;

        if !confirm(&target) {
            log::info!("termination of {} (pid {}) declined", target.name, target.pid);
            return Ok(ActionOutcome::Declined);
        }

        log::warn!("terminating {} (pid {})", target.name, target.pid);
        if self.control.terminate(target.pid) {
            log::warn!("terminated {} (pid {})", target.name, target.pid);
            Ok(ActionOutcome::Done)
        } else {
            log::error!("failed to terminate {} (pid {})", target.name, target.pid);
            Err(TelemetryError::ActionFailed(format!(
                "could not terminate pid {}",
                target.pid
            )))
        }
    }

    pub fn set_priority(&self, target: &ProcessRecord, level: PriorityLevel) -> Result<()> {
        Self::check_target(target)?;
        let target = target.clone();
        let _lease = self.guard.try_acquire().ok_or_else(Self::busy)?;

        log::warn!(
            "setting priority of {} (pid {}) to {level}",
            target.name,
            target.pid
        );
        if self.control.set_priority(target.pid, level.class()) {
            Ok(())
        } else {
            log::error!("failed to set priority of pid {}", target.pid);
            Err(TelemetryError::ActionFailed(format!(
                "could not set priority of pid {} to {level}",
                target.pid
            )))
        }
    }

    /// Path of the executable behind `target`.
    pub fn full_path(&self, target: &ProcessRecord) -> Result<String> {
        self.control
            .full_path(target.pid)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                TelemetryError::ActionFailed(format!("no executable path for pid {}", target.pid))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        killed: Mutex<Vec<u32>>,
        priorities: Mutex<Vec<(u32, u32)>>,
        fail: bool,
    }

    impl ProcessControl for Recorder {
        fn terminate(&self, pid: u32) -> bool {
            self.killed.lock().unwrap().push(pid);
            !self.fail
        }
        fn set_priority(&self, pid: u32, priority_class: u32) -> bool {
            self.priorities.lock().unwrap().push((pid, priority_class));
            !self.fail
        }
        fn full_path(&self, pid: u32) -> Option<String> {
            (pid == 100).then(|| "/usr/sbin/sshd".to_string())
        }
    }

    fn target(pid: u32) -> ProcessRecord {
        ProcessRecord {
            pid,
            name: "sshd".into(),
            cpu_percent: 0.0,
            memory_mb: 4.0,
            disk_read_mb_s: 0.0,
            disk_write_mb_s: 0.0,
            thread_count: 1,
            handle_count: 9,
            priority_class: 0x20,
        }
    }

    fn actions(fail: bool) -> (ProcessActions, Arc<Recorder>) {
        let recorder = Arc::new(Recorder {
            fail,
            ..Recorder::default()
        });
        (
            ProcessActions::new(recorder.clone(), ActionGuard::new()),
            recorder,
        )
    }

    #[test]
    fn guard_is_held_during_confirmation_only() {
        let (actions, recorder) = actions(false);
        let guard = actions.guard().clone();
        let outcome = actions
            .terminate(&target(100), |t| {
                assert!(guard.is_held());
                t.pid == 100
            })
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Done);
        assert!(!actions.guard().is_held());
        assert_eq!(*recorder.killed.lock().unwrap(), vec![100]);
    }

    #[test]
    fn declined_confirmation_never_reaches_provider() {
        let (actions, recorder) = actions(false);
        let outcome = actions.terminate(&target(100), |_| false).unwrap();
        assert_eq!(outcome, ActionOutcome::Declined);
        assert!(recorder.killed.lock().unwrap().is_empty());
        assert!(!actions.guard().is_held());
    }

    #[test]
    fn protected_pids_are_refused() {
        let (actions, recorder) = actions(false);
        for pid in [0, 4] {
            let err = actions.terminate(&target(pid), |_| true).unwrap_err();
            assert!(matches!(err, TelemetryError::ActionRejected(_)));
        }
        assert!(actions.set_priority(&target(3), PriorityLevel::High).is_err());
        assert!(recorder.killed.lock().unwrap().is_empty());
    }

    #[test]
    fn failure_releases_guard() {
        let (actions, _) = actions(true);
        let err = actions.terminate(&target(100), |_| true).unwrap_err();
        assert!(matches!(err, TelemetryError::ActionFailed(_)));
        assert!(!actions.guard().is_held());
    }

    #[test]
    fn busy_guard_rejects_second_action() {
        let (actions, _) = actions(false);
        let _lease = actions.guard().try_acquire().unwrap();
        let err = actions
            .set_priority(&target(100), PriorityLevel::Low)
            .unwrap_err();
        assert!(matches!(err, TelemetryError::ActionRejected(_)));
    }

    #[test]
    fn priority_classes() {
        let (actions, recorder) = actions(false);
        actions
            .set_priority(&target(100), PriorityLevel::AboveNormal)
            .unwrap();
        assert_eq!(*recorder.priorities.lock().unwrap(), vec![(100, 0x8000)]);
        assert_eq!(PriorityLevel::from_name("below normal"), PriorityLevel::BelowNormal);
        assert_eq!(PriorityLevel::from_name("REALTIME"), PriorityLevel::Realtime);
        assert_eq!(PriorityLevel::from_name("turbo"), PriorityLevel::Normal);
        assert_eq!(PriorityLevel::from_class(0x40), Some(PriorityLevel::Low));
        assert_eq!(PriorityLevel::from_class(0x1), None);
    }

    #[test]
    fn nice_round_trips_through_levels() {
        for level in PriorityLevel::ALL {
            assert_eq!(PriorityLevel::from_nice(level.nice()), level);
        }
    }

    #[test]
    fn full_path_lookup() {
        let (actions, _) = actions(false);
        assert_eq!(actions.full_path(&target(100)).unwrap(), "/usr/sbin/sshd");
        assert!(actions.full_path(&target(101)).is_err());
    }
}
