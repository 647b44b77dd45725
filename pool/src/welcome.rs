//! Welcome message template.
//!
//! A client's first response carries an operator-configured prompt, e.g.
//! a link to the balance-management page. The template has exactly one
//! variable, `{{NodeID}}`, bound to the caller's id; unknown placeholders
//! pass through literally so an operator typo is visible in the delivered
//! message instead of failing silently.

use peerpool_types::NodeId;

/// Default prompt; operators override it in the pool config.
pub const DEFAULT_WELCOME: &str = "Welcome to the pool! Manage your account balance at \
                                   https://pool.example.org/account?node={{NodeID}}";

const NODE_ID_VAR: &str = "{{NodeID}}";

/// An immutable, shareable welcome template.
#[derive(Clone, Debug)]
pub struct WelcomeTemplate {
    template: String,
}

impl WelcomeTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Render the prompt for a client. An empty template renders empty,
    /// which suppresses the message field entirely.
    pub fn render(&self, node_id: &NodeId) -> String {
        self.template.replace(NODE_ID_VAR, node_id.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.template.is_empty()
    }
}

impl Default for WelcomeTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_WELCOME)
    }
}
