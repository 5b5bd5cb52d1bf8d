// Supplier account balance supervision
//
// One alert per low-balance episode: the latch is set when notifiers fire and
// cleared only once the balance climbs back above the limit.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::config::BalanceConfig;
use crate::error::{EngineError, EngineResult};
use crate::supplier::HotelSupplier;

const SEND_SMS_PATH: &str = "/api/v2/sms/messages";
const SMS_PROVIDERS_PATH: &str = "/api/v1/management/sms/providers";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceAlert {
    pub balance: i64,
    pub alert_limit: i64,
    pub account: String,
}

impl BalanceAlert {
    pub fn message(&self) -> String {
        format!(
            "Hotel supplier account does not have enough balance to place orders. Please check it.\n account: {}\n current balance: {}\n alert limit: {}",
            self.account, self.balance, self.alert_limit
        )
    }
}

#[async_trait]
pub trait BalanceAlertNotifier: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn notify(&self, alert: &BalanceAlert) -> EngineResult<()>;
}

pub struct BalanceSupervisor {
    supplier: Arc<dyn HotelSupplier>,
    notifiers: Vec<Arc<dyn BalanceAlertNotifier>>,
    config: BalanceConfig,
    notified: AtomicBool,
}

impl BalanceSupervisor {
    pub fn new(
        supplier: Arc<dyn HotelSupplier>,
        notifiers: Vec<Arc<dyn BalanceAlertNotifier>>,
        config: BalanceConfig,
    ) -> Self {
        Self {
            supplier,
            notifiers,
            config,
            notified: AtomicBool::new(false),
        }
    }

    pub fn is_notified(&self) -> bool {
        self.notified.load(Ordering::Acquire)
    }

    /// Fetches the balance and alerts every notifier when it first drops to
    /// or below the limit. Notifiers run detached; their failures are logged.
    pub async fn check_adequate_balance(&self) {
        let balance = match self.supplier.balance().await {
            Ok(balance) => balance,
            Err(err) => {
                error!(error = %err, tag = "balance_check_error", "cannot get balance from provider");
                return;
            }
        };

        if balance > self.config.alert_limit {
            self.notified.store(false, Ordering::Release);
            return;
        }

        if self
            .notified
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let alert = BalanceAlert {
            balance: balance as i64,
            alert_limit: self.config.alert_limit as i64,
            account: self.config.provider_account.clone(),
        };
        for notifier in &self.notifiers {
            let notifier = notifier.clone();
            let alert = alert.clone();
            tokio::spawn(async move {
                if let Err(err) = notifier.notify(&alert).await {
                    error!(notifier = notifier.name(), error = %err, tag = "balance_notifier_error", "balance notifier failed");
                }
            });
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingBalanceNotifier;

#[async_trait]
impl BalanceAlertNotifier for LoggingBalanceNotifier {
    fn name(&self) -> &'static str {
        "logger"
    }

    async fn notify(&self, alert: &BalanceAlert) -> EngineResult<()> {
        error!(
            balance = alert.balance,
            alert_limit = alert.alert_limit,
            account = %alert.account,
            tag = "balance_limit_reached",
            "provider balance is lower than the alert limit, charge the account ASAP"
        );
        Ok(())
    }
}

/// Sends the alert as one SMS batch through the messaging gateway, using the
/// first provider the gateway lists.
pub struct SmsBalanceNotifier {
    client: reqwest::Client,
    base_url: String,
    phone_numbers: Vec<String>,
}

impl SmsBalanceNotifier {
    pub fn new(base_url: impl Into<String>, phone_numbers: Vec<String>) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            phone_numbers,
        })
    }

    async fn provider_id(&self) -> EngineResult<i64> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, SMS_PROVIDERS_PATH))
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = response.json().await?;
        body.pointer("/result/0/id")
            .and_then(|id| id.as_i64())
            .ok_or_else(|| EngineError::Upstream("there is no available sms provider right now".to_string()))
    }
}

pub(crate) fn sms_batch(alert: &BalanceAlert, phone_numbers: &[String], provider_id: i64) -> serde_json::Value {
    let text = alert.message();
    let messages: Vec<serde_json::Value> = phone_numbers
        .iter()
        .map(|number| {
            json!({
                "to": number,
                "text": text,
                "providerId": provider_id,
                "smsType": "Normal",
            })
        })
        .collect();
    json!({ "messages": messages })
}

#[async_trait]
impl BalanceAlertNotifier for SmsBalanceNotifier {
    fn name(&self) -> &'static str {
        "sms"
    }

    async fn notify(&self, alert: &BalanceAlert) -> EngineResult<()> {
        if self.phone_numbers.is_empty() {
            return Ok(());
        }
        let provider_id = self.provider_id().await?;

        self.client
            .post(format!("{}{}", self.base_url, SEND_SMS_PATH))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&sms_batch(alert, &self.phone_numbers, provider_id))
            .send()
            .await?
            .error_for_status()?;

        info!(recipients = self.phone_numbers.len(), "balance alert sms sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supplier::stub::StubSupplier;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingNotifier {
        alerts: Mutex<Vec<BalanceAlert>>,
    }

    #[async_trait]
    impl BalanceAlertNotifier for CountingNotifier {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn notify(&self, alert: &BalanceAlert) -> EngineResult<()> {
            self.alerts.lock().push(alert.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct BrokenNotifier {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BalanceAlertNotifier for BrokenNotifier {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn notify(&self, _alert: &BalanceAlert) -> EngineResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::Upstream("sms gateway unreachable".to_string()))
        }
    }

    fn supervisor(
        balances: &[f64],
        notifiers: Vec<Arc<dyn BalanceAlertNotifier>>,
    ) -> BalanceSupervisor {
        let supplier = Arc::new(StubSupplier::new());
        supplier.balances.lock().extend(balances.iter().copied());
        let config = BalanceConfig {
            alert_limit: 60.0,
            provider_account: "reseller".to_string(),
            ..BalanceConfig::default()
        };
        BalanceSupervisor::new(supplier, notifiers, config)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn notifies_once_per_low_balance_episode() {
        let counting = Arc::new(CountingNotifier::default());
        let supervisor = supervisor(&[50.0, 50.0, 80.0, 40.0], vec![counting.clone()]);

        for _ in 0..4 {
            supervisor.check_adequate_balance().await;
            settle().await;
        }

        let alerts = counting.alerts.lock().clone();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].balance, 50);
        assert_eq!(alerts[1].balance, 40);
        assert!(supervisor.is_notified());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_notifier_does_not_block_the_others() {
        let counting = Arc::new(CountingNotifier::default());
        let broken = Arc::new(BrokenNotifier::default());
        let supervisor = supervisor(&[10.0], vec![broken.clone(), counting.clone()]);

        supervisor.check_adequate_balance().await;
        settle().await;

        assert_eq!(broken.calls.load(Ordering::SeqCst), 1);
        assert_eq!(counting.alerts.lock().len(), 1);
    }

    #[tokio::test]
    async fn unreadable_balance_leaves_latch_alone() {
        let counting = Arc::new(CountingNotifier::default());
        let supervisor = supervisor(&[], vec![counting.clone()]);

        supervisor.check_adequate_balance().await;

        assert!(!supervisor.is_notified());
        assert!(counting.alerts.lock().is_empty());
    }

    #[test]
    fn sms_batch_has_one_message_per_number() {
        let alert = BalanceAlert {
            balance: 40,
            alert_limit: 60,
            account: "reseller".to_string(),
        };
        let numbers = vec!["0912".to_string(), "0935".to_string()];

        let body = sms_batch(&alert, &numbers, 3);

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1]["to"], "0935");
        assert_eq!(messages[0]["providerId"], 3);
        assert!(messages[0]["text"].as_str().unwrap().contains("current balance: 40"));
    }
}
