pub const PATH_ACCESS_TOKEN: &str = "/api-base/auth/getAppAccessToken";
pub const PATH_SET_ABILITY_STATUS: &str = "/api-iot/device/setAbilityStatus";

pub const ABILITY_MOTION_DETECT: &str = "motionDetect";
pub const ABILITY_LINK_DEV_ALARM: &str = "linkDevAlarm";
pub const ABILITY_LINKAGE_WHITE_LIGHT: &str = "linkageWhiteLight";

pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_VERSION: &str = "Version";
pub const HEADER_ACCESS_KEY: &str = "AccessKey";
pub const HEADER_APP_ACCESS_TOKEN: &str = "AppAccessToken";
pub const HEADER_TIMESTAMP: &str = "Timestamp";
pub const HEADER_NONCE: &str = "Nonce";
pub const HEADER_TRACE_ID: &str = "X-TraceId-Header";
pub const HEADER_PRODUCT_ID: &str = "ProductId";
pub const HEADER_SIGN: &str = "Sign";

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const API_SUCCESS_CODE: &str = "200";
