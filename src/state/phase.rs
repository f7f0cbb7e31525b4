/// Crawl phase definitions for the hierarchy traversal
///
/// The crawler moves `Idle → DiscoveringCountries → DiscoveringCities →
/// DiscoveringLocations → FetchingLeafItems`, dipping into `Cooldown`
/// whenever a mandatory pause is in progress and ending in `Idle` or `Error`.
use std::fmt;

/// Represents the current phase of the crawler
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CrawlPhase {
    /// Not traversing
    #[default]
    Idle,

    /// Paging through the country listing
    DiscoveringCountries,

    /// Paging through one country's cities
    DiscoveringCities { country: String },

    /// Paging through one city's locations
    DiscoveringLocations { city: String },

    /// Consuming one location's leaf item stream
    FetchingLeafItems { location: String },

    /// Suspended in a cooldown, forced pause, or emergency break
    Cooldown,

    /// The run stopped on an unrecoverable condition
    Error(String),
}

impl CrawlPhase {
    /// Returns true if this phase issues remote fetches
    pub fn is_traversing(&self) -> bool {
        matches!(
            self,
            Self::DiscoveringCountries
                | Self::DiscoveringCities { .. }
                | Self::DiscoveringLocations { .. }
                | Self::FetchingLeafItems { .. }
        )
    }

    /// Returns true if the run is over
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Short machine-friendly name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::DiscoveringCountries => "discovering_countries",
            Self::DiscoveringCities { .. } => "discovering_cities",
            Self::DiscoveringLocations { .. } => "discovering_locations",
            Self::FetchingLeafItems { .. } => "fetching_leaf_items",
            Self::Cooldown => "cooldown",
            Self::Error(_) => "error",
        }
    }
}

impl fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DiscoveringCities { country } => write!(f, "{}({})", self.name(), country),
            Self::DiscoveringLocations { city } => write!(f, "{}({})", self.name(), city),
            Self::FetchingLeafItems { location } => write!(f, "{}({})", self.name(), location),
            Self::Error(message) => write!(f, "error({})", message),
            _ => f.write_str(self.name()),
        }
    }
}
