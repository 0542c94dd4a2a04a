pub mod accounts;
pub mod health;
pub mod images;
pub mod oauth;
pub mod posts;

use libcrosspost::PlatformKind;

use crate::error::ApiErr;

fn parse_platform(raw: &str) -> Result<PlatformKind, ApiErr> {
    raw.parse::<PlatformKind>().map_err(ApiErr::from)
}
