use std::fmt;

/// Lifecycle states of a service, in transition order.
///
/// The state machine only moves forward: `Uninitialized < Initialized <
/// Starting < Running < Stopping < Stopped`. `Stopped` is terminal; a new
/// start cycle re-arms the machine by resetting the state out of band.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServiceState {
    Uninitialized,
    Initialized,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl ServiceState {
    /// The state one forward step away. `Stopped` has no successor.
    pub(crate) fn next(self) -> ServiceState {
        match self {
            ServiceState::Uninitialized => ServiceState::Initialized,
            ServiceState::Initialized => ServiceState::Starting,
            ServiceState::Starting => ServiceState::Running,
            ServiceState::Running => ServiceState::Stopping,
            ServiceState::Stopping | ServiceState::Stopped => ServiceState::Stopped,
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceState::Uninitialized => "uninitialized",
            ServiceState::Initialized => "initialized",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_are_totally_ordered() {
        let order = [
            ServiceState::Uninitialized,
            ServiceState::Initialized,
            ServiceState::Starting,
            ServiceState::Running,
            ServiceState::Stopping,
            ServiceState::Stopped,
        ];
        for pair in order.windows(2) {
            assert!(pair[0] < pair[1], "{} should precede {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn next_walks_the_chain_and_stops_at_stopped() {
        let mut state = ServiceState::Uninitialized;
        let mut seen = vec![state];
        for _ in 0..8 {
            state = state.next();
            seen.push(state);
        }
        assert_eq!(seen[1], ServiceState::Initialized);
        assert_eq!(seen[4], ServiceState::Stopping);
        assert_eq!(seen[5], ServiceState::Stopped);
        assert_eq!(state, ServiceState::Stopped);
    }
}
