// Device, notify and certificate endpoints
//
// All of these require an established session token. Notify-style calls
// return as soon as the cloud accepts the request; device acknowledgement
// arrives later on the event stream.

use serde::Serialize;
use serde::de::IgnoredAny;
use tracing::debug;

use crate::client::ApiClient;
use crate::endpoints;
use crate::error::Error;
use crate::models::{
    ActiveAutomation, ActivityRequest, CertBundle, CertRequest, DeviceRecord, HmswebVersion, RatlsToken,
    StreamStart,
};

impl ApiClient {
    /// List every device on the account.
    pub async fn list_devices(&self) -> Result<Vec<DeviceRecord>, Error> {
        let url = self.api_url(endpoints::DEVICES)?;
        self.cloud_get(url).await
    }

    /// Active automation modes per gateway.
    pub async fn active_automations(&self) -> Result<Vec<ActiveAutomation>, Error> {
        let url = self.api_url(endpoints::AUTOMATION_ACTIVE)?;
        self.cloud_get(url).await
    }

    /// Post a notify body (a single object or a batch array) to a device.
    pub async fn notify(
        &self,
        device_id: &str,
        xcloud_id: Option<&str>,
        body: &(impl Serialize + Sync),
    ) -> Result<(), Error> {
        debug!(device_id, "notify");
        let url = self.api_url(&format!("{}/{device_id}", endpoints::NOTIFY))?;
        let _: IgnoredAny = self.cloud_post(url, body, xcloud_id).await?;
        Ok(())
    }

    /// Ask the cloud to start a user stream; returns the raw stream URL.
    pub async fn start_stream(&self, request: &ActivityRequest, xcloud_id: Option<&str>) -> Result<String, Error> {
        let url = self.api_url(endpoints::START_STREAM)?;
        let start: StreamStart = self.cloud_post(url, request, xcloud_id).await?;
        Ok(start.url)
    }

    pub async fn stop_stream(&self, request: &ActivityRequest, xcloud_id: Option<&str>) -> Result<(), Error> {
        let url = self.api_url(endpoints::STOP_STREAM)?;
        let _: IgnoredAny = self.cloud_post(url, request, xcloud_id).await?;
        Ok(())
    }

    /// Request a full-frame snapshot. The URL arrives later as an event.
    pub async fn full_frame_snapshot(&self, request: &ActivityRequest, xcloud_id: Option<&str>) -> Result<(), Error> {
        let url = self.api_url(endpoints::SNAPSHOT)?;
        let _: IgnoredAny = self.cloud_post(url, request, xcloud_id).await?;
        Ok(())
    }

    /// Submit a public key for hub-local certificate issuance.
    pub async fn create_certificates(&self, request: &CertRequest) -> Result<CertBundle, Error> {
        debug!(uuid = %request.uuid, "requesting local media certificates");
        let url = self.api_url(endpoints::CERT_CREATE)?;
        self.cloud_post(url, request, None).await
    }

    /// Short-lived token scoped to a hub's local storage API.
    pub async fn ratls_token(&self, hub_id: &str) -> Result<String, Error> {
        let url = self.api_url(&format!("{}/{hub_id}", endpoints::RATLS_TOKEN))?;
        let token: RatlsToken = self.cloud_get(url).await?;
        Ok(token.ratls_token)
    }

    /// Version string of the device/session API.
    pub async fn api_version(&self) -> Result<Option<String>, Error> {
        let url = self.api_url(endpoints::VERSION)?;
        let version: HmswebVersion = self.cloud_get(url).await?;
        Ok(version.version)
    }
}
