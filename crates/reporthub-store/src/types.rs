use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// How often a schedule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    SemiAnnually,
    Annually,
}

impl Frequency {
    /// Month advance between occurrences for the month-anchored variants;
    /// `None` for daily/weekly.
    pub fn month_step(self) -> Option<u32> {
        match self {
            Frequency::Daily | Frequency::Weekly => None,
            Frequency::Monthly => Some(1),
            Frequency::Quarterly => Some(3),
            Frequency::SemiAnnually => Some(6),
            Frequency::Annually => Some(12),
        }
    }
}

/// Wall-clock time of day in the schedule's own timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Self {
        Self { hour, minute }
    }
}

impl std::fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl std::str::FromStr for TimeOfDay {
    type Err = String;

    /// Parse `"HH:MM"` (24-hour). Range checking happens in
    /// [`Recurrence::validate`], not here.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (h, m) = s
            .split_once(':')
            .ok_or_else(|| format!("expected HH:MM, got {s:?}"))?;
        let hour: u8 = h.parse().map_err(|_| format!("bad hour in {s:?}"))?;
        let minute: u8 = m.parse().map_err(|_| format!("bad minute in {s:?}"))?;
        Ok(Self { hour, minute })
    }
}

/// When a schedule recurs. Persisted as a JSON column on the schedule row.
///
/// `day_of_week` uses 0 = Sunday … 6 = Saturday. `day_of_month` is 1–31 and
/// clamps to the last day of shorter months at computation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    pub frequency: Frequency,
    /// Local fire time in `timezone`.
    pub at: TimeOfDay,
    /// IANA timezone the local arithmetic is done in.
    pub timezone: Tz,
    /// Required for weekly schedules, ignored otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<u8>,
    /// Required for monthly and coarser schedules, ignored otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u8>,
}

impl Recurrence {
    /// Reject specs that cannot produce well-defined occurrences.
    ///
    /// Called on every create/update so the scheduling loop only ever sees
    /// valid recurrences.
    pub fn validate(&self) -> Result<()> {
        if self.at.hour > 23 || self.at.minute > 59 {
            return Err(StoreError::InvalidRecurrence(format!(
                "time of day {} out of range",
                self.at
            )));
        }
        if let Some(dow) = self.day_of_week {
            if dow > 6 {
                return Err(StoreError::InvalidRecurrence(format!(
                    "day_of_week {dow} out of range 0-6"
                )));
            }
        }
        if let Some(dom) = self.day_of_month {
            if !(1..=31).contains(&dom) {
                return Err(StoreError::InvalidRecurrence(format!(
                    "day_of_month {dom} out of range 1-31"
                )));
            }
        }
        match self.frequency {
            Frequency::Weekly if self.day_of_week.is_none() => Err(StoreError::InvalidRecurrence(
                "weekly schedule requires day_of_week".into(),
            )),
            Frequency::Monthly
            | Frequency::Quarterly
            | Frequency::SemiAnnually
            | Frequency::Annually
                if self.day_of_month.is_none() =>
            {
                Err(StoreError::InvalidRecurrence(format!(
                    "{:?} schedule requires day_of_month",
                    self.frequency
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Approval lifecycle of a schedule.
///
/// Schedules created with `requires_approval = false` start (and stay)
/// `approved`. Otherwise: `draft` → `pending_approval` → `approved`, with
/// revocation returning an approved schedule to `pending_approval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Draft,
    PendingApproval,
    Approved,
}

impl std::fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ApprovalState::Draft => "draft",
            ApprovalState::PendingApproval => "pending_approval",
            ApprovalState::Approved => "approved",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ApprovalState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ApprovalState::Draft),
            "pending_approval" => Ok(ApprovalState::PendingApproval),
            "approved" => Ok(ApprovalState::Approved),
            other => Err(format!("unknown approval state: {other}")),
        }
    }
}

/// Whether a report may leave the tenant's own email domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailSecurityLevel {
    /// External recipients are skipped at dispatch time (counted failed
    /// with a policy reason, not a transport error).
    InternalOnly,
    /// Any recipient address is allowed.
    Unrestricted,
}

impl std::fmt::Display for EmailSecurityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EmailSecurityLevel::InternalOnly => "internal_only",
            EmailSecurityLevel::Unrestricted => "unrestricted",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for EmailSecurityLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "internal_only" => Ok(EmailSecurityLevel::InternalOnly),
            "unrestricted" => Ok(EmailSecurityLevel::Unrestricted),
            other => Err(format!("unknown email security level: {other}")),
        }
    }
}

/// A persisted recurring report schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    /// UUID v4 string — primary key.
    pub id: String,
    /// Owning tenant; all queries are scoped by it.
    pub tenant_id: String,
    /// The report definition this schedule runs.
    pub report_id: String,
    /// Human-readable label.
    pub name: String,
    pub recurrence: Recurrence,
    /// Next due instant. `None` while disabled, deleted, unapproved, or
    /// claimed for an in-flight execution.
    pub next_run_at: Option<DateTime<Utc>>,
    pub is_enabled: bool,
    pub requires_approval: bool,
    pub approval_state: ApprovalState,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub email_security_level: EmailSecurityLevel,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker; deleted schedules are invisible to all queries.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Fields required to create a schedule.
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub tenant_id: String,
    pub report_id: String,
    pub name: String,
    pub recurrence: Recurrence,
    pub requires_approval: bool,
    pub email_security_level: EmailSecurityLevel,
    pub created_by: String,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdateSchedule {
    pub name: Option<String>,
    pub recurrence: Option<Recurrence>,
    pub email_security_level: Option<EmailSecurityLevel>,
}

/// An email destination configured on a schedule.
///
/// Internal/external classification is *derived* at dispatch time from the
/// live tenant directory rather than stored, so domain-list changes take
/// effect without touching recipient rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    pub schedule_id: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl Recipient {
    /// The domain part of the address, lowercased.
    pub fn domain(&self) -> Option<String> {
        self.email.rsplit_once('@').map(|(_, d)| d.to_lowercase())
    }
}
