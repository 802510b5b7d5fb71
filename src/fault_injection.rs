use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default simulated execution time of a long-running command.
pub const DEFAULT_TIME_TO_COMPLETE_S: f64 = 0.4;

/// How the command-level fault flags behave once they fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultPolicy {
    /// `raiseException` clears itself after failing one invocation.
    pub raise_exception_one_shot: bool,
    /// `faultyInCommand` stays set until an operator clears it.
    pub faulty_in_command_persistent: bool,
}

impl Default for FaultPolicy {
    fn default() -> Self {
        Self {
            raise_exception_one_shot: true,
            faulty_in_command_persistent: true,
        }
    }
}

/// Operator-controlled fault flags of one device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaultFlags {
    pub faulty_in_command: bool,
    pub raise_exception: bool,
    pub obs_faulty: bool,
    pub time_to_complete_s: f64,
}

impl Default for FaultFlags {
    fn default() -> Self {
        Self {
            faulty_in_command: false,
            raise_exception: false,
            obs_faulty: false,
            time_to_complete_s: DEFAULT_TIME_TO_COMPLETE_S,
        }
    }
}

/// Fault injection statistics for diagnostics
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct FaultInjectionStats {
    pub exceptions_raised: u32,
    pub faulty_commands: u32,
    pub faulty_executions: u32,
    pub obs_faults_triggered: u32,
    pub flag_writes: u32,
}

/// Fault injection controller. Holds the flags and applies the configured
/// [`FaultPolicy`] when the engine consults them.
#[derive(Debug, Clone)]
pub struct FaultInjector {
    flags: FaultFlags,
    policy: FaultPolicy,
    stats: FaultInjectionStats,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::new_with_policy(FaultPolicy::default(), DEFAULT_TIME_TO_COMPLETE_S)
    }

    pub fn new_with_policy(policy: FaultPolicy, time_to_complete_s: f64) -> Self {
        Self {
            flags: FaultFlags {
                time_to_complete_s,
                ..FaultFlags::default()
            },
            policy,
            stats: FaultInjectionStats::default(),
        }
    }

    /// Consume a pending `raiseException`. Returns true when the current
    /// invocation must fail.
    pub fn take_raise_exception(&mut self) -> bool {
        if !self.flags.raise_exception {
            return false;
        }
        if self.policy.raise_exception_one_shot {
            self.flags.raise_exception = false;
        }
        self.stats.exceptions_raised += 1;
        true
    }

    /// Consult `faultyInCommand` at invocation time.
    pub fn take_command_fault(&mut self) -> bool {
        if !self.flags.faulty_in_command {
            return false;
        }
        self.consume_faulty();
        self.stats.faulty_commands += 1;
        true
    }

    /// Consult `faultyInCommand` from a running worker.
    pub fn take_execution_fault(&mut self) -> bool {
        if !self.flags.faulty_in_command {
            return false;
        }
        self.consume_faulty();
        self.stats.faulty_executions += 1;
        true
    }

    fn consume_faulty(&mut self) {
        if !self.policy.faulty_in_command_persistent {
            self.flags.faulty_in_command = false;
        }
    }

    /// Consult `obsFaulty` from a running worker. The flag is not cleared.
    pub fn check_obs_fault(&mut self) -> bool {
        if self.flags.obs_faulty {
            self.stats.obs_faults_triggered += 1;
        }
        self.flags.obs_faulty
    }

    pub fn set_faulty_in_command(&mut self, value: bool) {
        self.flags.faulty_in_command = value;
        self.stats.flag_writes += 1;
    }

    pub fn set_raise_exception(&mut self, value: bool) {
        self.flags.raise_exception = value;
        self.stats.flag_writes += 1;
    }

    pub fn set_obs_faulty(&mut self, value: bool) {
        self.flags.obs_faulty = value;
        self.stats.flag_writes += 1;
    }

    /// Set the simulated execution time. Values that do not fit a
    /// `Duration` (negative, NaN, infinite or too large) are refused.
    pub fn set_time_to_complete(&mut self, seconds: f64) -> Result<(), f64> {
        if Duration::try_from_secs_f64(seconds).is_err() {
            return Err(seconds);
        }
        self.flags.time_to_complete_s = seconds;
        self.stats.flag_writes += 1;
        Ok(())
    }

    /// `None` when the configured value is not a representable duration.
    pub fn time_to_complete(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(self.flags.time_to_complete_s).ok()
    }

    pub fn get_flags(&self) -> &FaultFlags {
        &self.flags
    }

    pub fn get_stats(&self) -> &FaultInjectionStats {
        &self.stats
    }
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self::new()
    }
}
