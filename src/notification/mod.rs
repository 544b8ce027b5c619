//! 通知：面向用户的结构化提示与只追加的通知总线

pub mod bus;
pub mod types;

pub use bus::{NotificationBus, TransportNotification};
pub use types::{
    DeliveryChannel, Notification, NotificationAction, NotificationPayload, NotificationPriority,
    NotificationSource,
};
