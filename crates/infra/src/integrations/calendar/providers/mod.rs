//! Built-in fetchers, one per source kind

mod caldav;
mod google;
mod ics_feed;
mod roster;

pub use caldav::CalDavFetcher;
pub use google::GoogleCalendarFetcher;
pub use ics_feed::IcsFeedFetcher;
pub use roster::RosterFetcher;

use homeboard_domain::Credential;
use reqwest::RequestBuilder;

/// Attach the source's credential to a request
fn authorize(builder: RequestBuilder, credential: Option<&Credential>) -> RequestBuilder {
    match credential {
        Some(Credential::Bearer(token)) => builder.bearer_auth(token),
        Some(Credential::Basic { username, password }) => builder.basic_auth(username, Some(password)),
        None => builder,
    }
}
