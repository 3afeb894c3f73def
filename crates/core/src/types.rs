/// Delivery orders ("bons de livraison") are keyed by opaque strings
/// issued by the external store.
pub type DeliveryId = String;

/// Fleet registry key.
pub type TruckId = String;

/// Client account key.
pub type ClientId = String;

/// Purchase order ("bon de commande") key.
pub type PurchaseOrderId = String;

/// All stamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
