//! BLE module role state machine
//!
//! Tracks the role the module is known to be in. The role only changes when
//! the module confirms it (a successful set or query) or when the module is
//! reset.

use crate::at_command::set;
use log::{info, warn};

/// Operating mode of the BLE module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Unknown,
    /// Discoverable, connectable (module default)
    Peripheral,
    /// Required to scan and to connect to other devices
    Central,
}

impl Role {
    /// Digit used by AT+ROLE<n> and in role replies
    pub fn digit(self) -> Option<char> {
        match self {
            Role::Peripheral => Some('0'),
            Role::Central => Some('1'),
            Role::Unknown => None,
        }
    }

    /// Command switching the module to this role
    pub fn set_command(self) -> Option<&'static str> {
        match self {
            Role::Peripheral => Some(set::ROLE_PERIPHERAL),
            Role::Central => Some(set::ROLE_CENTRAL),
            Role::Unknown => None,
        }
    }

    /// Echo some firmwares send back after AT+ROLE<n>
    pub fn set_echo(self) -> Option<&'static str> {
        match self {
            Role::Peripheral => Some("+ROLE=0"),
            Role::Central => Some("+ROLE=1"),
            Role::Unknown => None,
        }
    }
}

/// Role query reply grammar, tried in order
pub const ROLE_REPLIES: [(&str, Role); 6] = [
    ("OK+Get:1", Role::Central),
    ("OK+Get:0", Role::Peripheral),
    // Firmwares without the "OK" prefix
    ("+Get:1", Role::Central),
    ("+Get:0", Role::Peripheral),
    ("+ROLE=1", Role::Central),
    ("+ROLE=0", Role::Peripheral),
];

/// Match a role query reply against the known grammars
pub fn role_from_reply(reply: &str) -> Option<Role> {
    ROLE_REPLIES
        .iter()
        .find(|(marker, _)| reply.contains(marker))
        .map(|&(_, role)| role)
}

/// Events fed to the role state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleEvent {
    /// The module confirmed its role (set or query succeeded)
    Confirmed(Role),
    /// A query or set attempt did not produce a usable answer
    QueryFailed,
    /// The module was reset
    ModuleReset,
}

/// Result of feeding an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleTransition {
    /// Keep the current role
    Stay,
    /// Move to a new role
    Transition(Role),
}

/// Role state machine
pub struct RoleMachine {
    current: Role,
    previous: Option<Role>,
}

impl RoleMachine {
    pub const fn new() -> Self {
        Self {
            current: Role::Unknown,
            previous: None,
        }
    }

    pub fn current(&self) -> Role {
        self.current
    }

    pub fn previous(&self) -> Option<Role> {
        self.previous
    }

    pub fn is_central(&self) -> bool {
        self.current == Role::Central
    }

    /// Feed an event and apply the resulting transition
    pub fn handle_event(&mut self, event: RoleEvent) -> RoleTransition {
        let transition = Self::transition_for(self.current, event);
        if let RoleTransition::Transition(new_role) = transition {
            self.transition_to(new_role);
        }
        transition
    }

    fn transition_to(&mut self, new_role: Role) {
        if new_role != self.current {
            info!("[BLE] Role {:?} -> {:?}", self.current, new_role);
            self.previous = Some(self.current);
            self.current = new_role;
        }
    }

    fn transition_for(current: Role, event: RoleEvent) -> RoleTransition {
        match (current, event) {
            // A confirmation of "unknown" carries no information
            (_, RoleEvent::Confirmed(Role::Unknown)) => RoleTransition::Stay,
            (current, RoleEvent::Confirmed(role)) if current == role => RoleTransition::Stay,
            (_, RoleEvent::Confirmed(role)) => RoleTransition::Transition(role),

            (_, RoleEvent::QueryFailed) => {
                warn!("[BLE] Role not confirmed, keeping {:?}", current);
                RoleTransition::Stay
            }

            (Role::Unknown, RoleEvent::ModuleReset) => RoleTransition::Stay,
            (_, RoleEvent::ModuleReset) => RoleTransition::Transition(Role::Unknown),
        }
    }
}

impl Default for RoleMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unknown() {
        let machine = RoleMachine::new();
        assert_eq!(machine.current(), Role::Unknown);
        assert_eq!(machine.previous(), None);
    }

    #[test]
    fn confirmation_moves_role_and_remembers_previous() {
        let mut machine = RoleMachine::new();
        assert_eq!(
            machine.handle_event(RoleEvent::Confirmed(Role::Peripheral)),
            RoleTransition::Transition(Role::Peripheral)
        );
        machine.handle_event(RoleEvent::Confirmed(Role::Central));
        assert!(machine.is_central());
        assert_eq!(machine.previous(), Some(Role::Peripheral));

        assert_eq!(
            machine.handle_event(RoleEvent::Confirmed(Role::Central)),
            RoleTransition::Stay
        );
    }

    #[test]
    fn failures_keep_role_and_reset_forgets_it() {
        let mut machine = RoleMachine::new();
        machine.handle_event(RoleEvent::Confirmed(Role::Central));
        assert_eq!(
            machine.handle_event(RoleEvent::QueryFailed),
            RoleTransition::Stay
        );
        assert!(machine.is_central());

        assert_eq!(
            machine.handle_event(RoleEvent::ModuleReset),
            RoleTransition::Transition(Role::Unknown)
        );
        assert_eq!(machine.current(), Role::Unknown);
        assert_eq!(
            machine.handle_event(RoleEvent::Confirmed(Role::Unknown)),
            RoleTransition::Stay
        );
    }

    #[test]
    fn role_reply_grammars() {
        assert_eq!(role_from_reply("OK+Get:1\r\n"), Some(Role::Central));
        assert_eq!(role_from_reply("OK+Get:0"), Some(Role::Peripheral));
        assert_eq!(role_from_reply("+Get:1"), Some(Role::Central));
        assert_eq!(role_from_reply("+ROLE=0\r\nOK"), Some(Role::Peripheral));
        assert_eq!(role_from_reply("OK"), None);
    }
}
