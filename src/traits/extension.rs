// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::broker::{Content, Message};

/// Per-activity hook, created by an extension factory registered on the
/// [`ExtensionsMapper`](crate::extensions::ExtensionsMapper).
///
/// `activate` runs when the activity enters (or is discarded), `deactivate`
/// when it leaves or stops. `format` may rewrite the content of a lifecycle
/// message before the activity handles it.
pub trait Extension: Send {
    fn activate(&mut self, _message: &Message) {}

    fn deactivate(&mut self, _message: &Message) {}

    /// Return `Some` with the new content to replace it, `None` to leave it as is.
    fn format(&mut self, _message: &Message) -> Result<Option<Content>, String> {
        Ok(None)
    }
}
