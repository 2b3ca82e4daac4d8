use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(OrderId);
id_newtype!(CustomerId);
id_newtype!(UserId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    InProgress,
    Paused,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "new",
            OrderStatus::InProgress => "in_progress",
            OrderStatus::Paused => "paused",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(OrderStatus::New),
            "in_progress" => Some(OrderStatus::InProgress),
            "paused" => Some(OrderStatus::Paused),
            "completed" => Some(OrderStatus::Completed),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Cancelled)
    }

    /// Transitions the server accepts. The board drives a subset of these;
    /// pause and cancel are reachable only through the order detail surface.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (New, InProgress)
                | (New, Cancelled)
                | (InProgress, New)
                | (InProgress, Paused)
                | (InProgress, Completed)
                | (InProgress, Cancelled)
                | (Paused, InProgress)
                | (Paused, Cancelled)
                | (Completed, New)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl OrderPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderPriority::Low => "low",
            OrderPriority::Medium => "medium",
            OrderPriority::High => "high",
            OrderPriority::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(OrderPriority::Low),
            "medium" => Some(OrderPriority::Medium),
            "high" => Some(OrderPriority::High),
            "urgent" => Some(OrderPriority::Urgent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerStatus {
    Active,
    Inactive,
    Blacklisted,
}

impl CustomerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerStatus::Active => "active",
            CustomerStatus::Inactive => "inactive",
            CustomerStatus::Blacklisted => "blacklisted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(CustomerStatus::Active),
            "inactive" => Some(CustomerStatus::Inactive),
            "blacklisted" => Some(CustomerStatus::Blacklisted),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            OrderStatus::New,
            OrderStatus::InProgress,
            OrderStatus::Paused,
            OrderStatus::Completed,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("done"), None);
    }

    #[test]
    fn cancelled_is_the_only_terminal_status() {
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Completed.is_terminal());
        for next in [
            OrderStatus::New,
            OrderStatus::InProgress,
            OrderStatus::Paused,
            OrderStatus::Completed,
        ] {
            assert!(!OrderStatus::Cancelled.can_transition_to(next));
        }
    }

    #[test]
    fn completed_reopens_only_through_new() {
        assert!(OrderStatus::Completed.can_transition_to(OrderStatus::New));
        assert!(!OrderStatus::Completed.can_transition_to(OrderStatus::InProgress));
        assert!(!OrderStatus::Completed.can_transition_to(OrderStatus::Paused));
    }

    #[test]
    fn priority_ordering_matches_urgency() {
        assert!(OrderPriority::Urgent > OrderPriority::High);
        assert!(OrderPriority::High > OrderPriority::Medium);
        assert!(OrderPriority::Medium > OrderPriority::Low);
    }
}
