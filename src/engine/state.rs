use serde::{Deserialize, Serialize};

/// Scheduling states of an execution unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessorState {
    Init,
    InitFunction,
    Ready,
    PreparingInput,
    Invoking,
    InvokingExceptionHandler,
    RepublishingOutput,
    ScheduleFinished,
    Suspended,
    Error,
}

impl ProcessorState {
    /// Check if transition from current state to target state is valid
    pub fn can_transition_to(&self, target: &ProcessorState) -> bool {
        use ProcessorState::*;

        matches!(
            (self, target),
            (Init, InitFunction) |
            (InitFunction, Ready) |
            (InitFunction, InitFunction) |

            (Ready, PreparingInput) |

            (PreparingInput, InvokingExceptionHandler) |
            (PreparingInput, Invoking) |
            (PreparingInput, PreparingInput) |

            (InvokingExceptionHandler, RepublishingOutput) |

            (Invoking, RepublishingOutput) |
            (Invoking, Invoking) |

            (RepublishingOutput, ScheduleFinished) |
            (RepublishingOutput, RepublishingOutput) |

            (ScheduleFinished, Ready) |

            (Suspended, InitFunction) |
            (Suspended, Ready)
        ) || self.can_fail_or_suspend_to(target)
    }

    fn can_fail_or_suspend_to(&self, target: &ProcessorState) -> bool {
        match target {
            // any state may be suspended, including a suspended one
            ProcessorState::Suspended => true,
            ProcessorState::Error => !matches!(self, ProcessorState::Error),
            _ => false,
        }
    }

    /// States in which `schedule` does no work
    pub fn is_idle(&self) -> bool {
        matches!(self, ProcessorState::Init | ProcessorState::Suspended | ProcessorState::Error)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "Init",
            Self::InitFunction => "InitFunction",
            Self::Ready => "Ready",
            Self::PreparingInput => "PreparingInput",
            Self::Invoking => "Invoking",
            Self::InvokingExceptionHandler => "InvokingExceptionHandler",
            Self::RepublishingOutput => "RepublishingOutput",
            Self::ScheduleFinished => "ScheduleFinished",
            Self::Suspended => "Suspended",
            Self::Error => "Error",
        }
    }

    pub(crate) fn as_u8(&self) -> u8 {
        match self {
            Self::Init => 0,
            Self::InitFunction => 1,
            Self::Ready => 2,
            Self::PreparingInput => 3,
            Self::Invoking => 4,
            Self::InvokingExceptionHandler => 5,
            Self::RepublishingOutput => 6,
            Self::ScheduleFinished => 7,
            Self::Suspended => 8,
            Self::Error => 9,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Init,
            1 => Self::InitFunction,
            2 => Self::Ready,
            3 => Self::PreparingInput,
            4 => Self::Invoking,
            5 => Self::InvokingExceptionHandler,
            6 => Self::RepublishingOutput,
            7 => Self::ScheduleFinished,
            8 => Self::Suspended,
            _ => Self::Error,
        }
    }
}

impl Default for ProcessorState {
    fn default() -> Self {
        Self::Init
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_cycle() {
        use ProcessorState::*;
        let cycle = [Ready, PreparingInput, Invoking, RepublishingOutput, ScheduleFinished, Ready];
        for pair in cycle.windows(2) {
            assert!(pair[0].can_transition_to(&pair[1]), "{} -> {}", pair[0].name(), pair[1].name());
        }
    }

    #[test]
    fn test_invalid_transitions() {
        use ProcessorState::*;
        assert!(!Ready.can_transition_to(&Invoking));
        assert!(!ScheduleFinished.can_transition_to(&PreparingInput));
        assert!(!Error.can_transition_to(&Ready));
        assert!(!Suspended.can_transition_to(&Invoking));
    }

    #[test]
    fn test_suspend_from_anywhere() {
        use ProcessorState::*;
        for state in [Init, Ready, Invoking, RepublishingOutput, Error, Suspended] {
            assert!(state.can_transition_to(&Suspended));
        }
        assert!(Suspended.can_transition_to(&InitFunction));
        assert!(Suspended.can_transition_to(&Ready));
    }

    #[test]
    fn test_u8_mapping() {
        use ProcessorState::*;
        for state in [Init, InitFunction, Ready, PreparingInput, Invoking, InvokingExceptionHandler, RepublishingOutput, ScheduleFinished, Suspended, Error] {
            assert_eq!(ProcessorState::from_u8(state.as_u8()), state);
        }
    }
}
