use std::time::Duration;

use collegecm_auth::{Cookie, hash_session_token, issue_session_token, session_cookie, session_token};
use http::{HeaderMap, HeaderValue, header};

#[test]
fn issued_cookie_is_read_back_by_the_next_request() {
    let token = issue_session_token();
    let set_cookie = session_cookie(&token, Duration::from_secs(3600), false);

    // A browser echoes back only the name=value pair.
    let parsed = Cookie::parse(set_cookie.to_string()).expect("Set-Cookie should parse back");
    let pair = parsed.stripped().to_string();
    let mut headers = HeaderMap::new();
    headers.insert(
        header::COOKIE,
        HeaderValue::from_str(&pair).expect("cookie should be a valid header"),
    );

    let read = session_token(&headers).expect("session cookie should parse");
    assert_eq!(read, token);
    assert_eq!(hash_session_token(&read), hash_session_token(&token));
}
