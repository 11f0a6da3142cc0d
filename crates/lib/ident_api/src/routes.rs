//! Route paths.

pub const GET_PING: &str = "/ping";

pub const POST_CLIENT_REGISTER: &str = "/client/register";
pub const POST_CLIENT_REVOKE: &str = "/client/revoke";

pub const POST_USER_SIGN_UP: &str = "/user/sign-up";
pub const POST_USER_UPDATE_PASSWORD: &str = "/user/update-password";

pub const POST_SESSION_LOGIN: &str = "/session/login";
pub const POST_SESSION_REFRESH_TOKEN: &str = "/session/refresh-token";
pub const POST_SESSION_LOGOUT: &str = "/session/logout";
