//! Recipient fan-out with per-recipient failure accounting.
//!
//! Each recipient is classified internal or external against the tenant's
//! allowed-domain list, then sent to independently: one address failing —
//! whether by policy or by transport — never blocks the rest, and delivery
//! failures never fail the execution itself.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use reporthub_core::external::{EmailTransport, ReportPayload, TenantDirectory};
use reporthub_store::types::{EmailSecurityLevel, Recipient, Schedule};

/// Aggregated per-run delivery counts, written back onto the execution
/// record together with its terminal status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub sent: u32,
    pub failed: u32,
}

/// Result of one dispatch pass.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub stats: DeliveryStats,
    /// True when the cancellation signal fired mid-dispatch; the counts
    /// cover only the recipients processed before the abort.
    pub aborted: bool,
}

/// Fans one completed report out to a schedule's recipient list.
pub struct Notifier {
    transport: Arc<dyn EmailTransport>,
    directory: Arc<dyn TenantDirectory>,
}

impl Notifier {
    pub fn new(transport: Arc<dyn EmailTransport>, directory: Arc<dyn TenantDirectory>) -> Self {
        Self {
            transport,
            directory,
        }
    }

    /// Deliver `payload` to every recipient, checking `cancel` between
    /// sends (each send awaits the external transport, so this is the
    /// dispatch loop's suspension point).
    pub async fn dispatch(
        &self,
        schedule: &Schedule,
        payload: &ReportPayload,
        recipients: &[Recipient],
        cancel: &watch::Receiver<bool>,
    ) -> DispatchOutcome {
        let allowed = self.allowed_domains(&schedule.tenant_id).await;
        let subject = format!("Scheduled report: {}", schedule.name);

        let mut stats = DeliveryStats::default();
        for recipient in recipients {
            if *cancel.borrow() {
                warn!(
                    schedule_id = %schedule.id,
                    delivered = stats.sent,
                    "dispatch aborted by cancellation"
                );
                return DispatchOutcome {
                    stats,
                    aborted: true,
                };
            }

            let external = !is_internal(recipient, &allowed);
            if external && schedule.email_security_level == EmailSecurityLevel::InternalOnly {
                // Policy violation, not a transport error — counted failed
                // so the record shows the recipient was not reached.
                warn!(
                    schedule_id = %schedule.id,
                    email = %recipient.email,
                    "external recipient skipped: report is internal-only"
                );
                stats.failed += 1;
                continue;
            }

            match self.transport.send(&recipient.email, &subject, payload).await {
                Ok(()) => stats.sent += 1,
                Err(e) => {
                    warn!(
                        schedule_id = %recipient.schedule_id,
                        email = %recipient.email,
                        error = %e,
                        "recipient delivery failed"
                    );
                    stats.failed += 1;
                }
            }
        }

        info!(
            schedule_id = %schedule.id,
            sent = stats.sent,
            failed = stats.failed,
            "dispatch complete"
        );
        DispatchOutcome {
            stats,
            aborted: false,
        }
    }

    /// Directory lookup with a fail-closed fallback: when the tenant
    /// directory is unreachable every recipient classifies as external,
    /// so internal-only reports leak nowhere.
    async fn allowed_domains(&self, tenant_id: &str) -> HashSet<String> {
        match self.directory.allowed_domains(tenant_id).await {
            Ok(domains) => domains.into_iter().map(|d| d.to_lowercase()).collect(),
            Err(e) => {
                warn!(tenant = %tenant_id, error = %e, "tenant directory lookup failed; treating all recipients as external");
                HashSet::new()
            }
        }
    }
}

fn is_internal(recipient: &Recipient, allowed: &HashSet<String>) -> bool {
    recipient
        .domain()
        .is_some_and(|d| allowed.contains(d.as_str()))
}
