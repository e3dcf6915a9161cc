pub mod auth;
pub mod calendar_client;
pub mod docs_client;
pub mod drive_client;
pub mod gmail_client;
pub mod google_api;
pub mod sheets_client;

pub use auth::{AccessTokenSource, ServiceAccountAuth, StaticAccessToken};
pub use calendar_client::CalendarClient;
pub use docs_client::DocsClient;
pub use drive_client::DriveClient;
pub use gmail_client::GmailClient;
pub use google_api::GoogleApi;
pub use sheets_client::SheetsClient;

use crate::core::dispatch::WorkspaceClient;
use std::sync::Arc;

/// One client per workspace capability, sharing a transport.
pub fn workspace_clients(auth: Arc<dyn AccessTokenSource>) -> Vec<Arc<dyn WorkspaceClient>> {
    let api = GoogleApi::new(auth);
    vec![
        Arc::new(GmailClient::new(api.clone())),
        Arc::new(CalendarClient::new(api.clone())),
        Arc::new(DriveClient::new(api.clone())),
        Arc::new(SheetsClient::new(api.clone())),
        Arc::new(DocsClient::new(api)),
    ]
}
