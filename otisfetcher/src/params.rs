use graphsync::schema::TicketKind;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{OtisFetcherError, Result};

pub const SUBSCRIPTION_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// One subscription key per vendor product.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SubscriptionKeys {
    pub availability: String,
    pub maintenance: String,
    pub repair: String,
    pub customer_callback: String,
    pub assets: String,
    pub performance: String,
    pub status: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiPaths {
    pub availability: String,
    pub maintenance: String,
    pub repair: String,
    pub customer_callback: String,
    pub assets: String,
    pub performance: String,
    pub status: String,
}

impl Default for ApiPaths {
    fn default() -> Self {
        Self {
            availability: "/elevatoravailability/api/latestavailability".to_string(),
            maintenance: "/elevatormaintenance/api/latestmaintenanceinfo".to_string(),
            repair: "/elevatorrepair/api/latestrepairinfo".to_string(),
            customer_callback: "/callback/api/latestcallbackinfo".to_string(),
            assets: "/iot/api/assets".to_string(),
            performance: "/elevatorperformance/api/performance".to_string(),
            status: "/elevatorstatus/api/lateststatus".to_string(),
        }
    }
}

/// Connection settings of the vendor API gateway.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OtisParams {
    pub base_url: String,
    pub country_code: String,
    pub customer_id: String,
    pub contract_no: String,
    pub keys: SubscriptionKeys,
    pub paths: ApiPaths,
    pub timeout_secs: u64,
}

impl Default for OtisParams {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            country_code: String::new(),
            customer_id: String::new(),
            contract_no: String::new(),
            keys: SubscriptionKeys::default(),
            paths: ApiPaths::default(),
            timeout_secs: 30,
        }
    }
}

impl OtisParams {
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(OtisFetcherError::InvalidParam(
                "base_url must be set".to_string(),
            ));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(OtisFetcherError::InvalidParam(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Contract selection sent with every ticket request.
    pub fn contract_query(&self) -> Vec<(&'static str, String)> {
        vec![
            ("country_code", self.country_code.clone()),
            ("customer_id", self.customer_id.clone()),
            ("contract_no", self.contract_no.clone()),
        ]
    }

    pub fn ticket_path(&self, kind: TicketKind) -> &str {
        match kind {
            TicketKind::Availability => &self.paths.availability,
            TicketKind::Maintenance => &self.paths.maintenance,
            TicketKind::Repair => &self.paths.repair,
            TicketKind::CustomerCallback => &self.paths.customer_callback,
        }
    }

    pub fn ticket_key(&self, kind: TicketKind) -> &str {
        match kind {
            TicketKind::Availability => &self.keys.availability,
            TicketKind::Maintenance => &self.keys.maintenance,
            TicketKind::Repair => &self.keys.repair,
            TicketKind::CustomerCallback => &self.keys.customer_callback,
        }
    }
}
