//! Domain records owned by the commerce platform.
//!
//! These are plain data: the checkout core reads them and asks the stores in
//! [`crate::db`] to transition them, never mutating them in place.

pub mod basket;
pub mod order;
pub mod order_data;
pub mod payment;
pub mod product;
pub mod user;

pub use basket::{Basket, BasketAttribute, BasketLine, EMAIL_OPT_IN_ATTRIBUTE, MixedCurrency};
pub use order::{NewOrder, Order, OrderLine};
pub use order_data::{OrderData, OrderLineData, OrderProduct, OrderUser};
pub use payment::{NewPayment, PaymentRecord};
pub use product::Product;
pub use user::CurrentUser;
