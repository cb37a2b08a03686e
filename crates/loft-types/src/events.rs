use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tables that emit change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Notifications,
    Messages,
    Conversations,
    ConversationParticipants,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Notifications => "notifications",
            Self::Messages => "messages",
            Self::Conversations => "conversations",
            Self::ConversationParticipants => "conversation_participants",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
}

/// Row filter in `column=eq.value` form, e.g. `user_id=eq.<uuid>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ColumnFilter {
    pub column: String,
    pub value: String,
}

impl ColumnFilter {
    pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
        Self {
            column: column.into(),
            value: value.to_string(),
        }
    }

    /// True when `row[column]` renders to the filter value.
    pub fn matches(&self, row: &Value) -> bool {
        match row.get(&self.column) {
            Some(Value::String(s)) => *s == self.value,
            Some(Value::Null) | None => false,
            Some(other) => other.to_string() == self.value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterParseError(String);

impl fmt::Display for FilterParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid filter '{}': expected column=eq.value", self.0)
    }
}

impl std::error::Error for FilterParseError {}

impl FromStr for ColumnFilter {
    type Err = FilterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (column, rest) = s.split_once('=').ok_or_else(|| FilterParseError(s.into()))?;
        let value = rest.strip_prefix("eq.").ok_or_else(|| FilterParseError(s.into()))?;
        if column.is_empty() || value.is_empty() {
            return Err(FilterParseError(s.into()));
        }
        Ok(Self {
            column: column.to_string(),
            value: value.to_string(),
        })
    }
}

impl TryFrom<String> for ColumnFilter {
    type Error = FilterParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ColumnFilter> for String {
    fn from(filter: ColumnFilter) -> Self {
        filter.to_string()
    }
}

impl fmt::Display for ColumnFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

/// A row change as delivered by the channel. `new` is the row after the
/// change; `old` is only present for updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    pub table: Table,
    pub kind: ChangeKind,
    pub new: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
}

/// Commands sent FROM client TO gateway over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Start receiving changes of `table`, optionally narrowed by `filter`.
    Subscribe {
        sub_id: u32,
        table: Table,
        #[serde(default)]
        filter: Option<ColumnFilter>,
    },

    /// Stop a subscription. Unknown ids are ignored.
    Unsubscribe { sub_id: u32 },
}

/// Events sent FROM gateway TO client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Subscription handshake complete
    Subscribed { sub_id: u32 },

    Unsubscribed { sub_id: u32 },

    /// A row change matching the subscription
    Change { sub_id: u32, change: RawChange },

    /// Command rejected
    Error {
        sub_id: Option<u32>,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_parses_and_displays() {
        let f: ColumnFilter = "user_id=eq.abc-123".parse().unwrap();
        assert_eq!(f.column, "user_id");
        assert_eq!(f.value, "abc-123");
        assert_eq!(f.to_string(), "user_id=eq.abc-123");

        assert!("user_id".parse::<ColumnFilter>().is_err());
        assert!("user_id=neq.1".parse::<ColumnFilter>().is_err());
        assert!("=eq.1".parse::<ColumnFilter>().is_err());
        assert!("user_id=eq.".parse::<ColumnFilter>().is_err());
    }

    #[test]
    fn filter_matches_row_values() {
        let f = ColumnFilter::eq("user_id", "u1");
        assert!(f.matches(&json!({ "user_id": "u1" })));
        assert!(!f.matches(&json!({ "user_id": "u2" })));
        assert!(!f.matches(&json!({ "user_id": null })));
        assert!(!f.matches(&json!({})));

        let n = ColumnFilter::eq("priority", 3);
        assert!(n.matches(&json!({ "priority": 3 })));
    }

    #[test]
    fn subscribe_command_wire_shape() {
        let cmd = GatewayCommand::Subscribe {
            sub_id: 1,
            table: Table::Notifications,
            filter: Some(ColumnFilter::eq("user_id", "u1")),
        };
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "Subscribe",
                "data": { "sub_id": 1, "table": "notifications", "filter": "user_id=eq.u1" }
            })
        );

        let bad = json!({
            "type": "Subscribe",
            "data": { "sub_id": 1, "table": "messages", "filter": "nonsense" }
        });
        assert!(serde_json::from_value::<GatewayCommand>(bad).is_err());
    }
}
