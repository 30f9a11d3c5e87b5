//! pipeshield server components.
//!
//! Two independent paths share nothing but the decision store: the
//! [`reconciler`] recomputes and persists the gate state on a timer (on the
//! elected leader only), and the [`webhook`] answers admission calls on every
//! replica by reading that state.

pub mod leader;
pub mod reconciler;
pub mod webhook;
