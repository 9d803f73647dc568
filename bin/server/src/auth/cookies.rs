//! Conversion of framework-free cookie directives into axum-extra cookies.

use axum_extra::extract::cookie::{Cookie, SameSite};
use casdoor_sso_relying_party::{CookieDirective, SameSitePolicy};
use time::OffsetDateTime;

/// Builds the `Set-Cookie` value for `directive`.
///
/// Removal directives also carry an expiry in the past so older browsers
/// that ignore `Max-Age` drop the cookie too.
pub fn to_cookie(directive: CookieDirective) -> Cookie<'static> {
    let removal = directive.is_removal();
    let mut builder = Cookie::build((directive.name, directive.value))
        .path(directive.path)
        .http_only(directive.http_only)
        .secure(directive.secure)
        .same_site(match directive.same_site {
            SameSitePolicy::Strict => SameSite::Strict,
            SameSitePolicy::Lax => SameSite::Lax,
            SameSitePolicy::None => SameSite::None,
        })
        .max_age(directive.max_age);

    if let Some(domain) = directive.domain {
        builder = builder.domain(domain);
    }
    if removal {
        builder = builder.expires(OffsetDateTime::UNIX_EPOCH);
    }

    builder.build()
}
