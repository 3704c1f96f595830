pub mod cart;
pub mod catalog;
pub mod feedback;
pub mod orders;
pub mod payment_gateway;
pub mod payments;
