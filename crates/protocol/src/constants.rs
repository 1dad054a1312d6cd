//! Header names, content types and defaults shared by client and core.

/// Default API root of the delivery service.
pub const DEFAULT_API_BASE_URL: &str = "https://api.massive.app/v1";

/// Header carrying the authenticated user token (team-scoped calls).
pub const USER_TOKEN_HEADER: &str = "X-User-Token";

/// Header carrying the package access token (package-scoped calls).
pub const PACKAGE_TOKEN_HEADER: &str = "X-Package-Token";

/// Content type used for part PUTs.
pub const PART_CONTENT_TYPE: &str = "application/binary";

/// Method a file blueprint must carry to initiate a multipart upload.
pub const BLUEPRINT_METHOD: &str = "POST";

/// Entry kind sent when registering a file with a package.
pub const FILE_KIND: &str = "file";

/// Query parameter of a destination URL that carries its part number.
pub const PART_NUMBER_QUERY_KEY: &str = "partNumber";

/// Default part size: 100 MiB.
pub const DEFAULT_PART_SIZE: u64 = 100 * 1024 * 1024;
