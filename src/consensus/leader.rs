use crate::core::Role;
use log::info;

/// Round-robin over the fixed role list
#[derive(Debug, Clone)]
pub struct LeaderSchedule {
    next_index: usize,
    current: Option<Role>,
}

impl Default for LeaderSchedule {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaderSchedule {
    pub fn new() -> LeaderSchedule {
        LeaderSchedule {
            next_index: 0,
            current: None,
        }
    }

    /// Advances to the next role, wrapping after the last
    pub fn select_leader(&mut self) -> Role {
        let leader = Role::ALL[self.next_index];
        self.next_index = (self.next_index + 1) % Role::ALL.len();
        self.current = Some(leader);
        info!("Leader selected: {leader}");
        leader
    }

    pub fn current(&self) -> Option<Role> {
        self.current
    }

    pub fn is_leader(&self, role: Role) -> bool {
        self.current == Some(role)
    }

    pub fn handle_leader_failure(&mut self) -> Role {
        if let Some(failed) = self.current {
            info!("Leader {failed} failed, selecting new leader");
        }
        self.select_leader()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin_wraps() {
        let mut schedule = LeaderSchedule::new();
        assert_eq!(schedule.current(), None);

        let picked: Vec<Role> = (0..6).map(|_| schedule.select_leader()).collect();
        assert_eq!(
            picked,
            vec![
                Role::Ngo,
                Role::Government,
                Role::Hospital,
                Role::Auditor,
                Role::Admin,
                Role::Ngo
            ]
        );
        assert!(schedule.is_leader(Role::Ngo));
        assert_eq!(schedule.handle_leader_failure(), Role::Government);
    }
}
