use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use graphsync::schema::TicketKind;
use serde::de::DeserializeOwned;

use crate::error::{OtisFetcherError, Result};
use crate::models::{AssetResponse, Asset, TicketBatch, UnitSample};
use crate::params::{OtisParams, SUBSCRIPTION_HEADER};

/// The vendor gateway as seen by the fetcher.
#[async_trait]
pub trait OtisService: Send + Sync {
    async fn tickets(&self, kind: TicketKind) -> Result<TicketBatch>;

    async fn assets(&self) -> Result<Vec<Asset>>;

    async fn performance(
        &self,
        unit_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UnitSample>>;

    async fn status(&self, unit_id: &str) -> Result<Vec<UnitSample>>;
}

/// `OtisService` over HTTPS with reqwest.
#[derive(Clone, Debug)]
pub struct ReqwestService {
    http_client: reqwest::Client,
    params: OtisParams,
}

impl ReqwestService {
    pub fn new(params: OtisParams) -> Result<Self> {
        params.validate()?;
        let http_client = reqwest::Client::builder()
            .timeout(params.timeout())
            .build()?;
        Ok(Self {
            http_client,
            params,
        })
    }

    pub fn params(&self) -> &OtisParams {
        &self.params
    }

    async fn make_request<T>(&self, path: &str, key: &str, query: &[(&str, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let url = self.params.url(path);
        log::debug!("GET {}", url);

        let response = self
            .http_client
            .get(&url)
            .query(query)
            .header(SUBSCRIPTION_HEADER, key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(OtisFetcherError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[async_trait]
impl OtisService for ReqwestService {
    async fn tickets(&self, kind: TicketKind) -> Result<TicketBatch> {
        let path = self.params.ticket_path(kind);
        let key = self.params.ticket_key(kind);
        let query = self.params.contract_query();
        let batch = match kind {
            TicketKind::Availability => {
                TicketBatch::Availability(self.make_request(path, key, &query).await?)
            }
            TicketKind::Maintenance => {
                TicketBatch::Maintenance(self.make_request(path, key, &query).await?)
            }
            TicketKind::Repair => TicketBatch::Repair(self.make_request(path, key, &query).await?),
            TicketKind::CustomerCallback => {
                TicketBatch::CustomerCallback(self.make_request(path, key, &query).await?)
            }
        };
        Ok(batch)
    }

    async fn assets(&self) -> Result<Vec<Asset>> {
        let response: AssetResponse = self
            .make_request(
                &self.params.paths.assets,
                &self.params.keys.assets,
                &self.params.contract_query(),
            )
            .await?;
        Ok(response.data)
    }

    async fn performance(
        &self,
        unit_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UnitSample>> {
        let mut query = self.params.contract_query();
        query.push(("unit_id", unit_id.to_string()));
        query.push(("from", rfc3339(from)));
        query.push(("to", rfc3339(to)));
        self.make_request(
            &self.params.paths.performance,
            &self.params.keys.performance,
            &query,
        )
        .await
    }

    async fn status(&self, unit_id: &str) -> Result<Vec<UnitSample>> {
        let mut query = self.params.contract_query();
        query.push(("unit_id", unit_id.to_string()));
        self.make_request(&self.params.paths.status, &self.params.keys.status, &query)
            .await
    }
}
