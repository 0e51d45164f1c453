//! Transaction variables.
//!
//! Every SecLang variable is a [`Variable`] tag with a stable integer
//! ordering. The tag decides the storage shape ([`VariableKind`]): owning
//! singles and maps, persistent collections, and composite views that only
//! borrow the maps they cover.

mod collection;
mod persistent;
mod proxy;
mod store;

pub use collection::{AnchoredValue, Collection, LazySingle, Map, MatchData, Single};
pub use persistent::PersistentCollection;
pub use proxy::{CollectionRef, NamesView, ProxyView, SizeView};
pub use store::TransactionVariables;

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;

macro_rules! define_variables {
    ($($(#[$doc:meta])* $tag:ident => $name:literal,)*) => {
        /// Variable tags supported by the rule language.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum Variable {
            $($(#[$doc])* $tag,)*
        }

        impl Variable {
            /// Every tag, in tag order.
            pub const ALL: &'static [Variable] = &[$(Variable::$tag,)*];

            /// Canonical upper-case name of the variable.
            pub fn name(self) -> &'static str {
                match self {
                    $(Variable::$tag => $name,)*
                }
            }
        }
    };
}

define_variables! {
    /// Content type of the response, without parameters.
    ResponseContentType => "RESPONSE_CONTENT_TYPE",
    /// Transaction unique identifier.
    UniqueId => "UNIQUE_ID",
    /// Combined size of arguments (values only).
    ArgsCombinedSize => "ARGS_COMBINED_SIZE",
    /// Combined size of uploaded files.
    FilesCombinedSize => "FILES_COMBINED_SIZE",
    /// Length of the full request.
    FullRequestLength => "FULL_REQUEST_LENGTH",
    /// Set to 1 when the request body exceeded its limit.
    InboundDataError => "INBOUND_DATA_ERROR",
    /// Value of the last matched variable.
    MatchedVar => "MATCHED_VAR",
    /// Name of the last matched variable.
    MatchedVarName => "MATCHED_VAR_NAME",
    /// Multipart boundary was quoted.
    MultipartBoundaryQuoted => "MULTIPART_BOUNDARY_QUOTED",
    /// Multipart boundary contained whitespace.
    MultipartBoundaryWhitespace => "MULTIPART_BOUNDARY_WHITESPACE",
    /// Multipart body mixed CRLF and LF line endings.
    MultipartCrlfLfLines => "MULTIPART_CRLF_LF_LINES",
    /// Data found after the final boundary.
    MultipartDataAfter => "MULTIPART_DATA_AFTER",
    /// Data found before the first boundary.
    MultipartDataBefore => "MULTIPART_DATA_BEFORE",
    /// More files than the upload limit allows.
    MultipartFileLimitExceeded => "MULTIPART_FILE_LIMIT_EXCEEDED",
    /// A part header used folding.
    MultipartHeaderFolding => "MULTIPART_HEADER_FOLDING",
    /// A part header used invalid folding.
    MultipartInvalidHeaderFolding => "MULTIPART_INVALID_HEADER_FOLDING",
    /// A part could not be parsed.
    MultipartInvalidPart => "MULTIPART_INVALID_PART",
    /// A part header had invalid quoting.
    MultipartInvalidQuoting => "MULTIPART_INVALID_QUOTING",
    /// Multipart body used bare LF line endings.
    MultipartLfLine => "MULTIPART_LF_LINE",
    /// Content-Disposition was missing a semicolon.
    MultipartMissingSemicolon => "MULTIPART_MISSING_SEMICOLON",
    /// Any multipart anomaly was detected.
    MultipartStrictError => "MULTIPART_STRICT_ERROR",
    /// The final boundary was never found.
    MultipartUnmatchedBoundary => "MULTIPART_UNMATCHED_BOUNDARY",
    /// Set to 1 when the response body exceeded its limit.
    OutboundDataError => "OUTBOUND_DATA_ERROR",
    /// Extra path information.
    PathInfo => "PATH_INFO",
    /// Raw query string.
    QueryString => "QUERY_STRING",
    /// Client IP address.
    RemoteAddr => "REMOTE_ADDR",
    /// Client host name.
    RemoteHost => "REMOTE_HOST",
    /// Client port.
    RemotePort => "REMOTE_PORT",
    /// Set to 1 when the request body failed to process.
    ReqbodyError => "REQBODY_ERROR",
    /// Request body error message.
    ReqbodyErrorMsg => "REQBODY_ERROR_MSG",
    /// Set to 1 when the body processor failed.
    ReqbodyProcessorError => "REQBODY_PROCESSOR_ERROR",
    /// Body processor error message.
    ReqbodyProcessorErrorMsg => "REQBODY_PROCESSOR_ERROR_MSG",
    /// Selected request body processor.
    ReqbodyProcessor => "REQBODY_PROCESSOR",
    /// Last path segment of the request.
    RequestBasename => "REQUEST_BASENAME",
    /// Raw request body.
    RequestBody => "REQUEST_BODY",
    /// Request body length.
    RequestBodyLength => "REQUEST_BODY_LENGTH",
    /// Request path without the query string.
    RequestFilename => "REQUEST_FILENAME",
    /// Full request line.
    RequestLine => "REQUEST_LINE",
    /// HTTP method.
    RequestMethod => "REQUEST_METHOD",
    /// HTTP protocol of the request.
    RequestProtocol => "REQUEST_PROTOCOL",
    /// Request URI.
    RequestUri => "REQUEST_URI",
    /// Request URI as received.
    RequestUriRaw => "REQUEST_URI_RAW",
    /// Raw response body.
    ResponseBody => "RESPONSE_BODY",
    /// Response content length.
    ResponseContentLength => "RESPONSE_CONTENT_LENGTH",
    /// HTTP protocol of the response.
    ResponseProtocol => "RESPONSE_PROTOCOL",
    /// Response status code.
    ResponseStatus => "RESPONSE_STATUS",
    /// Server IP address.
    ServerAddr => "SERVER_ADDR",
    /// Server host name (from the Host header).
    ServerName => "SERVER_NAME",
    /// Server port.
    ServerPort => "SERVER_PORT",
    /// Session identifier bound by `setsid`.
    SessionId => "SESSIONID",
    /// Highest severity of matched rules (255 when none).
    HighestSeverity => "HIGHEST_SEVERITY",
    /// Response status line.
    StatusLine => "STATUS_LINE",
    /// Microseconds elapsed since the transaction started.
    Duration => "DURATION",
    /// Set to 1 when the response body failed to process.
    ResbodyError => "RESBODY_ERROR",
    /// Response body error message.
    ResbodyErrorMsg => "RESBODY_ERROR_MSG",
    /// Set to 1 when the response body processor failed.
    ResbodyProcessorError => "RESBODY_PROCESSOR_ERROR",
    /// Response body processor error message.
    ResbodyProcessorErrorMsg => "RESBODY_PROCESSOR_ERROR_MSG",
    /// Selected response body processor.
    ResbodyProcessor => "RESBODY_PROCESSOR",
    /// Authentication type.
    AuthType => "AUTH_TYPE",
    /// Full request (line, headers and body).
    FullRequest => "FULL_REQUEST",
    /// User identifier bound by `setuid`.
    UserId => "USERID",
    /// Web application identifier.
    WebAppId => "WEBAPPID",
    /// Set to 1 when url-encoded parsing hit an invalid sequence.
    UrlencodedError => "URLENCODED_ERROR",
    /// Authenticated remote user.
    RemoteUser => "REMOTE_USER",
    /// Local time as HH:MM:SS.
    Time => "TIME",
    /// Day of month.
    TimeDay => "TIME_DAY",
    /// Seconds since the epoch.
    TimeEpoch => "TIME_EPOCH",
    /// Hour (0-23).
    TimeHour => "TIME_HOUR",
    /// Minute (0-59).
    TimeMin => "TIME_MIN",
    /// Month (0-11).
    TimeMon => "TIME_MON",
    /// Second (0-59).
    TimeSec => "TIME_SEC",
    /// Day of week (0-6, Sunday is 0).
    TimeWday => "TIME_WDAY",
    /// Four-digit year.
    TimeYear => "TIME_YEAR",

    /// Query string arguments.
    ArgsGet => "ARGS_GET",
    /// Body arguments.
    ArgsPost => "ARGS_POST",
    /// Path arguments (filled by `@restpath`).
    ArgsPath => "ARGS_PATH",
    /// Uploaded file sizes.
    FilesSizes => "FILES_SIZES",
    /// Uploaded file form names.
    FilesNames => "FILES_NAMES",
    /// Uploaded file contents.
    FilesTmpContent => "FILES_TMP_CONTENT",
    /// Multipart file names.
    MultipartFilename => "MULTIPART_FILENAME",
    /// Multipart part names.
    MultipartName => "MULTIPART_NAME",
    /// Multipart part headers.
    MultipartPartHeaders => "MULTIPART_PART_HEADERS",
    /// Values matched by the current rule.
    MatchedVars => "MATCHED_VARS",
    /// Names of variables matched by the current rule.
    MatchedVarsNames => "MATCHED_VARS_NAMES",
    /// Uploaded file names.
    Files => "FILES",
    /// Request cookies.
    RequestCookies => "REQUEST_COOKIES",
    /// Request headers.
    RequestHeaders => "REQUEST_HEADERS",
    /// Response headers.
    ResponseHeaders => "RESPONSE_HEADERS",
    /// Arguments parsed from the response body.
    ResponseArgs => "RESPONSE_ARGS",
    /// Geolocation data.
    Geo => "GEO",
    /// Temporary paths of kept uploads.
    FilesTmpNames => "FILES_TMPNAMES",
    /// Transaction collection.
    Tx => "TX",
    /// Current rule metadata.
    Rule => "RULE",
    /// JSON document (reserved).
    Json => "JSON",
    /// Environment set through `setenv`.
    Env => "ENV",
    /// Parsed request XML.
    RequestXml => "REQUEST_XML",
    /// Parsed response XML.
    ResponseXml => "RESPONSE_XML",

    /// All arguments (query, body and path).
    Args => "ARGS",
    /// Alias for `REQUEST_XML`.
    Xml => "XML",
    /// Names of all arguments.
    ArgsNames => "ARGS_NAMES",
    /// Names of query string arguments.
    ArgsGetNames => "ARGS_GET_NAMES",
    /// Names of body arguments.
    ArgsPostNames => "ARGS_POST_NAMES",
    /// Names of request headers.
    RequestHeadersNames => "REQUEST_HEADERS_NAMES",
    /// Names of response headers.
    ResponseHeadersNames => "RESPONSE_HEADERS_NAMES",
    /// Names of request cookies.
    RequestCookiesNames => "REQUEST_COOKIES_NAMES",

    /// Per-IP persistent collection.
    Ip => "IP",
    /// Per-session persistent collection.
    Session => "SESSION",
    /// Per-user persistent collection.
    User => "USER",
    /// Global persistent collection.
    Global => "GLOBAL",
    /// Per-resource persistent collection.
    Resource => "RESOURCE",
}

const ARGS_MAPS: &[Variable] = &[Variable::ArgsGet, Variable::ArgsPost, Variable::ArgsPath];
const SIZE_MAPS: &[Variable] = &[Variable::ArgsGet, Variable::ArgsPost];

/// Storage shape of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    /// One string.
    Single,
    /// One string computed on first read.
    LazySingle,
    /// Owning case-insensitive multimap.
    Map,
    /// Keys of the listed maps, exposed as values.
    Names(&'static [Variable]),
    /// Concatenation of the listed maps.
    Proxy(&'static [Variable]),
    /// Summed value length of the listed maps.
    Size(&'static [Variable]),
    /// Backed by the persistence store.
    Persistent,
}

impl VariableKind {
    /// Whether the variable owns its storage.
    pub fn is_owning(self) -> bool {
        matches!(
            self,
            VariableKind::Single | VariableKind::LazySingle | VariableKind::Map | VariableKind::Persistent
        )
    }
}

static BY_NAME: Lazy<HashMap<&'static str, Variable>> = Lazy::new(|| {
    let mut map: HashMap<&'static str, Variable> =
        Variable::ALL.iter().map(|v| (v.name(), *v)).collect();
    map.insert("FILES_TMP_NAMES", Variable::FilesTmpNames);
    map
});

impl Variable {
    /// Number of tags.
    pub const COUNT: usize = Variable::ALL.len();

    /// Parse a variable name (case-insensitive).
    pub fn parse(name: &str) -> Option<Variable> {
        BY_NAME.get(name.to_ascii_uppercase().as_str()).copied()
    }

    /// Tag index used by the transaction store.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Storage shape of this variable.
    pub fn kind(self) -> VariableKind {
        use Variable::*;
        match self {
            Duration => VariableKind::LazySingle,
            ArgsGet | ArgsPost | ArgsPath | FilesSizes | FilesNames | FilesTmpContent
            | MultipartFilename | MultipartName | MultipartPartHeaders | MatchedVars
            | MatchedVarsNames | Files | RequestCookies | RequestHeaders | ResponseHeaders
            | ResponseArgs | Geo | FilesTmpNames | Tx | Rule | Json | Env | RequestXml
            | ResponseXml => VariableKind::Map,
            Args => VariableKind::Proxy(ARGS_MAPS),
            Xml => VariableKind::Proxy(&[Variable::RequestXml]),
            ArgsCombinedSize => VariableKind::Size(SIZE_MAPS),
            ArgsNames => VariableKind::Names(ARGS_MAPS),
            ArgsGetNames => VariableKind::Names(&[Variable::ArgsGet]),
            ArgsPostNames => VariableKind::Names(&[Variable::ArgsPost]),
            RequestHeadersNames => VariableKind::Names(&[Variable::RequestHeaders]),
            ResponseHeadersNames => VariableKind::Names(&[Variable::ResponseHeaders]),
            RequestCookiesNames => VariableKind::Names(&[Variable::RequestCookies]),
            Ip | Session | User | Global | Resource => VariableKind::Persistent,
            _ => VariableKind::Single,
        }
    }

    /// Whether keys of this variable hold request arguments.
    pub fn is_args(self) -> bool {
        matches!(
            self,
            Variable::Args
                | Variable::ArgsGet
                | Variable::ArgsPost
                | Variable::ArgsPath
                | Variable::ArgsNames
                | Variable::ArgsGetNames
                | Variable::ArgsPostNames
        )
    }

    /// Whether selection on this variable is case-sensitive.
    pub fn is_case_sensitive(self) -> bool {
        cfg!(feature = "case-sensitive-args-keys")
            && matches!(self, Variable::ArgsGet | Variable::ArgsPost | Variable::ArgsPath)
    }

    /// Whether keys may contain XPath-like paths (`/` is not a regex delimiter).
    pub fn accepts_path_keys(self) -> bool {
        matches!(
            self,
            Variable::Xml | Variable::RequestXml | Variable::ResponseXml | Variable::Json
        )
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
