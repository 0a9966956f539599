#![forbid(unsafe_code)]

//! Built-in instruction workers.
//!
//! | instruction     | priority |
//! |-----------------|----------|
//! | `ignore`        | 0        |
//! | `alias`         | 2        |
//! | `controller`    | 3        |
//! | `on:<event>`    | 4        |
//! | `text`          | 5        |
//! | `html`          | 6        |
//! | `bind:<attr>`   | 7        |
//! | `model`         | 8        |

use std::rc::Rc;

use crate::instruction::InstructionTable;

mod alias;
mod bind;
pub mod binding;
mod controller;
mod html;
mod ignore;
mod model;
mod on;
mod text;

pub use alias::Alias;
pub use bind::Bind;
pub use controller::{Controller, droplets};
pub use html::Html;
pub use ignore::Ignore;
pub use model::Model;
pub use on::On;
pub use text::Text;

pub(crate) fn install(table: &InstructionTable) {
    table.register(Rc::new(Ignore));
    table.register(Rc::new(Alias));
    table.register(Rc::new(Controller));
    table.register(Rc::new(On));
    table.register(Rc::new(Text));
    table.register(Rc::new(Html));
    table.register(Rc::new(Bind));
    table.register(Rc::new(Model));
}
