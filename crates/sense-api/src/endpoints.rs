// Sense resource endpoints
//
// Monitor-scoped device data, the per-user timeline, and usage trends.
// Every call goes through `SenseClient::get`, so an expired access token is
// renewed before the request is sent.

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;
use url::Url;

use crate::client::SenseClient;
use crate::error::Error;
use crate::models::{
    AlwaysOn, DEFAULT_TIMELINE_ITEMS, DevicesOverview, TimelineResponse, Trend, TrendScale,
};

impl SenseClient {
    /// `{api_url}/app/monitors/{monitor_id}/{suffix}`
    fn monitor_url(&self, suffix: &str) -> Result<Url, Error> {
        let id = self.monitor_id().ok_or(Error::NoMonitor)?;
        self.endpoint(&format!("app/monitors/{id}/{suffix}"))
    }

    /// Always-on (standby) load for the primary monitor.
    ///
    /// `GET /app/monitors/{id}/devices/always_on`
    pub async fn always_on(&self) -> Result<AlwaysOn, Error> {
        let url = self.monitor_url("devices/always_on")?;
        debug!("fetching always-on load");
        self.get(url).await
    }

    /// Detected devices for the primary monitor.
    ///
    /// `GET /app/monitors/{id}/devices/overview?include_merged={bool}`
    pub async fn devices_overview(&self, include_merged: bool) -> Result<DevicesOverview, Error> {
        let mut url = self.monitor_url("devices/overview")?;
        url.query_pairs_mut()
            .append_pair("include_merged", if include_merged { "true" } else { "false" });
        debug!(include_merged, "fetching devices overview");
        self.get(url).await
    }

    /// Most recent timeline events for the logged-in user.
    ///
    /// `GET /users/{user_id}/timeline?n_items={n}`. Zero asks for the
    /// default of 30 items.
    pub async fn timeline(&self, n_items: u32) -> Result<TimelineResponse, Error> {
        let user_id = self.user_id().ok_or(Error::NotAuthenticated)?;
        let n_items = if n_items == 0 {
            DEFAULT_TIMELINE_ITEMS
        } else {
            n_items
        };

        let mut url = self.endpoint(&format!("users/{user_id}/timeline"))?;
        url.query_pairs_mut()
            .append_pair("n_items", &n_items.to_string());
        debug!(n_items, "fetching timeline");
        self.get(url).await
    }

    /// Aggregated usage for one `scale` bucket beginning at `start`.
    ///
    /// `GET /app/history/trends?monitor_id=..&device_id=&scale=..&start=..`
    pub async fn trend(&self, scale: TrendScale, start: DateTime<Utc>) -> Result<Trend, Error> {
        let monitor_id = self.monitor_id().ok_or(Error::NoMonitor)?;
        let mut url = self.endpoint("app/history/trends")?;
        url.query_pairs_mut()
            .append_pair("monitor_id", &monitor_id.to_string())
            .append_pair("device_id", "")
            .append_pair("scale", scale.as_str())
            .append_pair("start", &start.to_rfc3339_opts(SecondsFormat::Secs, true));
        debug!(%scale, %start, "fetching trend");
        self.get(url).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::token::Token;
    use secrecy::SecretString;

    fn client_with_monitor(monitor_id: Option<i64>) -> SenseClient {
        let client = SenseClient::with_client(
            reqwest::Client::new(),
            Url::parse("https://api.sense.com/apiservice/api/v1").unwrap(),
        );
        client.set_token(Token {
            access_token: SecretString::from("a"),
            refresh_token: SecretString::from("r"),
            user_id: 7,
            account_id: 9,
            monitor_id,
        });
        client
    }

    #[test]
    fn monitor_url_includes_id() {
        let c = client_with_monitor(Some(123));
        assert_eq!(
            c.monitor_url("devices/always_on").unwrap().path(),
            "/apiservice/api/v1/app/monitors/123/devices/always_on"
        );
    }

    #[tokio::test]
    async fn monitor_endpoints_need_a_monitor() {
        let c = client_with_monitor(None);
        assert!(matches!(c.always_on().await, Err(Error::NoMonitor)));
        assert!(matches!(
            c.trend(TrendScale::Day, Utc::now()).await,
            Err(Error::NoMonitor)
        ));
    }
}
