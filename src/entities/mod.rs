pub mod cart_item;
pub mod feedback;
pub mod order;
pub mod payment_intent;

pub use cart_item::Entity as CartItem;
pub use feedback::Entity as Feedback;
pub use order::Entity as Order;
pub use payment_intent::Entity as PaymentIntent;

pub use order::{OrderItems, OrderStatus, PaymentInfo};
