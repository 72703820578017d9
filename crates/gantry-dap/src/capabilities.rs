//! Capabilities advertised in the `initialize` response.

use crate::protocol::Capabilities;

/// What this server supports, stored as plain booleans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCapabilities {
    pub supports_configuration_done_request: bool,
    pub supports_conditional_breakpoints: bool,
    pub supports_function_breakpoints: bool,
    pub supports_evaluate_for_hovers: bool,
    pub supports_terminate_request: bool,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            supports_configuration_done_request: true,
            supports_conditional_breakpoints: false,
            supports_function_breakpoints: false,
            supports_evaluate_for_hovers: false,
            supports_terminate_request: false,
        }
    }
}

impl ServerCapabilities {
    /// Protocol form. Unsupported features are omitted rather than sent as
    /// `false`.
    pub fn to_protocol(&self) -> Capabilities {
        let flag = |b: bool| b.then_some(true);
        Capabilities {
            supports_configuration_done_request: flag(self.supports_configuration_done_request),
            supports_conditional_breakpoints: flag(self.supports_conditional_breakpoints),
            supports_hit_conditional_breakpoints: None,
            supports_function_breakpoints: flag(self.supports_function_breakpoints),
            supports_evaluate_for_hovers: flag(self.supports_evaluate_for_hovers),
            supports_terminate_request: flag(self.supports_terminate_request),
            exception_breakpoint_filters: Some(Vec::new()),
        }
    }
}
