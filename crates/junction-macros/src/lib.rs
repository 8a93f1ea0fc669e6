//! Procedural macros for the Junction extension point framework.
//!
//! This crate provides:
//!
//! - `#[derive(ExtensionPoint)]` - Implements `ExtensionPoint` (and
//!   `Interruptible` when the type embeds an `InterruptibleState`)
//!
//! ```rust,ignore
//! use junction::prelude::*;
//!
//! #[derive(Clone, ExtensionPoint)]
//! #[extension_point(name = "order.placed")]
//! pub struct OrderPlaced {
//!     pub order_id: u64,
//!     #[extension_point(interruptible)]
//!     pub state: InterruptibleState,
//! }
//! ```

mod point;

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

/// Derives `ExtensionPoint` for structs and enums.
///
/// # Attributes
///
/// - `#[extension_point(name = "...")]` - Stable point name used by
///   name-based registration (default: the Rust type name)
/// - `#[extension_point(crate = "...")]` - Path of the core crate, for
///   hosts that re-export it (default: `::junction_core`)
/// - `#[extension_point(interruptible)]` on one field of type
///   `InterruptibleState` - Makes the point vetoable and implements
///   `Interruptible`
///
/// # Example
///
/// ```rust,ignore
/// #[derive(ExtensionPoint)]
/// #[extension_point(name = "user.deleting")]
/// pub struct UserDeleting(pub u64, #[extension_point(interruptible)] pub InterruptibleState);
/// ```
#[proc_macro_derive(ExtensionPoint, attributes(extension_point))]
pub fn derive_extension_point(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match point::derive_extension_point(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}
