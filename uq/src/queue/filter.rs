//! Command list filtering

use crate::domain::{Command, CommandStatus};

/// Row-level filter for [`CommandQueue::list`](super::CommandQueue::list)
///
/// Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandFilter {
    pub status: Option<CommandStatus>,
    pub sim_id: Option<String>,
    pub device_id: Option<String>,
    /// Case-insensitive text matched against code, result and SIM id
    pub search: Option<String>,
}

impl CommandFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn status(status: CommandStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_sim(mut self, sim_id: impl Into<String>) -> Self {
        self.sim_id = Some(sim_id.into());
        self
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        let search = search.into();
        self.search = if search.trim().is_empty() { None } else { Some(search) };
        self
    }

    pub fn matches(&self, command: &Command) -> bool {
        self.status.is_none_or(|s| command.status == s)
            && self.sim_id.as_deref().is_none_or(|id| command.sim_id == id)
            && self.device_id.as_deref().is_none_or(|id| command.device_id == id)
            && self.search.as_deref().is_none_or(|needle| command.matches_search(needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Carrier, CommandRequest, CommandType};

    fn command(sim: &str, device: &str, code: &str) -> Command {
        Command::new(
            1,
            CommandRequest {
                code: code.to_string(),
                command_type: CommandType::Check,
                carrier: Carrier::Inwi,
                device_id: device.to_string(),
                sim_id: sim.to_string(),
            },
        )
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(CommandFilter::all().matches(&command("sim-1", "dev-1", "*123#")));
    }

    #[test]
    fn test_combined_filter() {
        let filter = CommandFilter::status(CommandStatus::Pending)
            .with_sim("sim-1")
            .with_device("dev-1")
            .with_search("123");

        assert!(filter.matches(&command("sim-1", "dev-1", "*123#")));
        assert!(!filter.matches(&command("sim-2", "dev-1", "*123#")));
        assert!(!filter.matches(&command("sim-1", "dev-2", "*123#")));
        assert!(!filter.matches(&command("sim-1", "dev-1", "*555#")));

        let mut done = command("sim-1", "dev-1", "*123#");
        done.status = CommandStatus::Success;
        assert!(!filter.matches(&done));
    }

    #[test]
    fn test_blank_search_is_ignored() {
        assert_eq!(CommandFilter::all().with_search("  ").search, None);
    }
}
