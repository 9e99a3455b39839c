//! Component lifecycle state machine.
//!
//! Every component (and every pipeline, through its components) moves
//! along one state graph:
//!
//! ```text
//! Init → Ready ⇄ Prepare ⇄ Active ⇄ Paused
//!          ↑________Reset________|
//! ```
//!
//! Transitions are driven by [`Trigger`]s. A trigger that would re-enter
//! the current state is reported as `AlreadySet` so callers can treat
//! repeated host commands as idempotent; an illegal trigger is a
//! `BadState` fatal.

use apx_core::ApxError;

/// Lifecycle state of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentState {
    /// Allocated, module not yet initialised.
    Init,
    /// Initialised; parameters may be applied.
    Ready,
    /// Per-stream resources allocated, periodicity computed.
    Prepare,
    /// Scheduled: `copy` runs every period.
    Active,
    /// Suspended with resources intact.
    Paused,
}

/// Lifecycle commands posted by the host or by recovery paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Prepare,
    Start,
    Release,
    Stop,
    Pause,
    Reset,
}

/// Computes the state entered when `trigger` fires in `state`.
///
/// Returns `Err(AlreadySet)` for a redundant trigger (no side effects are
/// expected of the caller) and `Err(BadState)` for an illegal one.
pub fn next_state(state: ComponentState, trigger: Trigger) -> Result<ComponentState, ApxError> {
    use ComponentState::*;

    let next = match (state, trigger) {
        (Ready, Trigger::Prepare) => Prepare,
        (Prepare, Trigger::Prepare) => return Err(ApxError::AlreadySet),

        (Prepare, Trigger::Start) | (Prepare, Trigger::Release) => Active,
        (Paused, Trigger::Release) | (Paused, Trigger::Start) => Active,
        (Active, Trigger::Start) | (Active, Trigger::Release) => return Err(ApxError::AlreadySet),

        (Active, Trigger::Pause) => Paused,
        (Paused, Trigger::Pause) => return Err(ApxError::AlreadySet),

        (Active, Trigger::Stop) | (Paused, Trigger::Stop) => Prepare,
        (Prepare, Trigger::Stop) => return Err(ApxError::AlreadySet),

        (Ready, Trigger::Reset) => return Err(ApxError::AlreadySet),
        (Prepare, Trigger::Reset) | (Active, Trigger::Reset) | (Paused, Trigger::Reset) => Ready,

        _ => return Err(ApxError::BadState),
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nominal_playback_sequence() {
        let mut s = ComponentState::Ready;
        for (trigger, expect) in [
            (Trigger::Prepare, ComponentState::Prepare),
            (Trigger::Start, ComponentState::Active),
            (Trigger::Pause, ComponentState::Paused),
            (Trigger::Release, ComponentState::Active),
            (Trigger::Stop, ComponentState::Prepare),
            (Trigger::Reset, ComponentState::Ready),
        ] {
            s = next_state(s, trigger).unwrap();
            assert_eq!(s, expect);
        }
    }

    #[test]
    fn test_double_trigger_is_already_set() {
        assert_eq!(
            next_state(ComponentState::Active, Trigger::Start),
            Err(ApxError::AlreadySet)
        );
        assert_eq!(
            next_state(ComponentState::Prepare, Trigger::Prepare),
            Err(ApxError::AlreadySet)
        );
        assert_eq!(
            next_state(ComponentState::Paused, Trigger::Pause),
            Err(ApxError::AlreadySet)
        );
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        assert_eq!(next_state(ComponentState::Init, Trigger::Start), Err(ApxError::BadState));
        assert_eq!(next_state(ComponentState::Ready, Trigger::Start), Err(ApxError::BadState));
        assert_eq!(next_state(ComponentState::Ready, Trigger::Pause), Err(ApxError::BadState));
        assert_eq!(next_state(ComponentState::Init, Trigger::Reset), Err(ApxError::BadState));
    }

    #[test]
    fn test_stop_from_paused_returns_to_prepare() {
        assert_eq!(
            next_state(ComponentState::Paused, Trigger::Stop),
            Ok(ComponentState::Prepare)
        );
    }
}
