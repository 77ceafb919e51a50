pub mod catalog;
pub mod events;
pub mod images;
pub mod page;
pub mod request;
