//! Client-side view of each entity's lifecycle.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrontendState {
    Unopened,
    Opened,
    Tuned,
    Stopped,
    Closed,
}

impl FrontendState {
    pub fn is_open(self) -> bool {
        matches!(
            self,
            FrontendState::Opened | FrontendState::Tuned | FrontendState::Stopped
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            FrontendState::Unopened => "frontend unopened",
            FrontendState::Opened => "frontend opened",
            FrontendState::Tuned => "frontend tuned",
            FrontendState::Stopped => "frontend stopped",
            FrontendState::Closed => "frontend closed",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DemuxState {
    Unopened,
    Opened,
    SourceBound,
    Closed,
}

impl DemuxState {
    pub fn is_open(self) -> bool {
        matches!(self, DemuxState::Opened | DemuxState::SourceBound)
    }

    pub fn name(self) -> &'static str {
        match self {
            DemuxState::Unopened => "demux unopened",
            DemuxState::Opened => "demux opened",
            DemuxState::SourceBound => "demux source bound",
            DemuxState::Closed => "demux closed",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescramblerState {
    Unopened,
    Opened,
    SourceBound,
    Closed,
}

impl DescramblerState {
    pub fn is_open(self) -> bool {
        matches!(self, DescramblerState::Opened | DescramblerState::SourceBound)
    }

    pub fn name(self) -> &'static str {
        match self {
            DescramblerState::Unopened => "descrambler unopened",
            DescramblerState::Opened => "descrambler opened",
            DescramblerState::SourceBound => "descrambler source bound",
            DescramblerState::Closed => "descrambler closed",
        }
    }
}

/// Filter lifecycle: added, configured, started, stopped. Removal and demux
/// close drop the filter from the session entirely.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterState {
    Added,
    Configured,
    Started,
    Stopped,
}

impl FilterState {
    pub fn can_start(self) -> bool {
        matches!(self, FilterState::Configured | FilterState::Stopped)
    }

    pub fn name(self) -> &'static str {
        match self {
            FilterState::Added => "filter not configured",
            FilterState::Configured => "filter configured",
            FilterState::Started => "filter started",
            FilterState::Stopped => "filter stopped",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_configured_or_stopped_filters_start() {
        assert!(!FilterState::Added.can_start());
        assert!(FilterState::Configured.can_start());
        assert!(!FilterState::Started.can_start());
        assert!(FilterState::Stopped.can_start());
    }

    #[test]
    fn closed_entities_are_not_open() {
        assert!(!FrontendState::Closed.is_open());
        assert!(FrontendState::Stopped.is_open());
        assert!(!DemuxState::Closed.is_open());
        assert!(!DescramblerState::Unopened.is_open());
    }
}
