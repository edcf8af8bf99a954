//! The platform BLE stack, as seen by the session core
//!
//! Every method only *requests* an operation. A returned `Ok` means the request
//! was accepted; the outcome arrives later on the radio's [`EventSinks`]
//! (`crate::core::bluetooth::events`) tagged with the [`RequestTag`] passed in.

use anyhow::Result;
use uuid::Uuid;

use crate::core::bluetooth::types::{AdvertisementPayload, LocalService, PeripheralId, RequestTag};

/// Radio/link layer collaborator
#[async_trait::async_trait]
pub trait Radio: Send + Sync {
    /// Starts scanning. `None` means no service filter.
    async fn scan(&self, services: Option<Vec<Uuid>>) -> Result<()>;

    async fn stop_scan(&self) -> Result<()>;

    async fn connect(&self, id: &PeripheralId, tag: RequestTag) -> Result<()>;

    /// Tears the link down. Completion is reported as `CentralEvent::Disconnected`.
    async fn disconnect_link(&self, id: &PeripheralId) -> Result<()>;

    async fn discover_services(
        &self,
        id: &PeripheralId,
        filter: Option<Vec<Uuid>>,
        tag: RequestTag,
    ) -> Result<()>;

    async fn discover_characteristics(
        &self,
        id: &PeripheralId,
        service: Uuid,
        filter: Option<Vec<Uuid>>,
        tag: RequestTag,
    ) -> Result<()>;

    async fn set_notify(
        &self,
        id: &PeripheralId,
        characteristic: Uuid,
        enabled: bool,
        tag: RequestTag,
    ) -> Result<()>;

    async fn read_value(&self, id: &PeripheralId, characteristic: Uuid, tag: RequestTag) -> Result<()>;

    async fn write_value(
        &self,
        id: &PeripheralId,
        characteristic: Uuid,
        value: Vec<u8>,
        tag: RequestTag,
    ) -> Result<()>;

    async fn read_rssi(&self, id: &PeripheralId, tag: RequestTag) -> Result<()>;

    /// Publishes a local GATT service (peripheral role)
    async fn add_local_service(&self, service: &LocalService) -> Result<()>;

    async fn advertise(&self, payload: &AdvertisementPayload) -> Result<()>;

    async fn stop_advertising(&self) -> Result<()>;
}
