//! CLI argument parsing for the OAuth administrative command surface.

use clap::{Parser, Subcommand, ValueEnum};

/// Administrative CLI for the OAuth interception and feature-flag subsystem.
#[derive(Parser, Debug)]
#[command(
    name = "oauth-cli",
    version,
    about = "Register upstream OAuth servers, manage tokens, and proxy requests through the interceptor."
)]
pub struct Cli {
    /// Path to the server-config store (JSON). Created on first `register`.
    #[arg(long, global = true)]
    pub config: Option<String>,
    /// Emit machine-readable JSON instead of a formatted table/message.
    #[arg(long, global = true)]
    pub json: bool,
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// The abstract admin command surface (spec §6), one variant per operation.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// `oauth.register` - add a new upstream server's OAuth configuration.
    Register(RegisterArgs),
    /// `oauth.update` - modify an existing server's OAuth configuration.
    Update(RegisterArgs),
    /// `oauth.remove` - delete a server's OAuth configuration.
    Remove {
        /// Registered server name.
        server: String,
    },
    /// `oauth.list` - list all registered servers.
    List,
    /// `oauth.status` - health of the store, providers, and a given server.
    Status {
        /// Registered server name.
        server: Option<String>,
    },
    /// `oauth.authorize` - build the provider's authorize-redirect URL.
    Authorize {
        /// Registered server name.
        server: String,
        /// Opaque CSRF state value; generated if omitted.
        #[arg(long)]
        state: Option<String>,
    },
    /// `oauth.token` - exchange an authorization code for tokens.
    Token {
        /// Registered server name.
        server: String,
        /// User this token belongs to.
        #[arg(long)]
        user: String,
        /// Authorization code returned by the provider's redirect.
        #[arg(long)]
        code: String,
        /// PKCE code verifier, if the authorize step used one.
        #[arg(long)]
        code_verifier: Option<String>,
    },
    /// `oauth.refresh` - force a token refresh for a user.
    Refresh {
        /// Registered server name.
        server: String,
        /// User whose token should be refreshed.
        #[arg(long)]
        user: String,
    },
    /// `oauth.revoke` - revoke and delete a user's token.
    Revoke {
        /// Registered server name.
        server: String,
        /// User whose token should be revoked.
        #[arg(long)]
        user: String,
    },
    /// `server.oauth.request` - proxy one request through the interceptor.
    Request {
        /// Registered server name.
        server: String,
        /// User on whose behalf the request executes.
        #[arg(long)]
        user: String,
        /// HTTP method.
        #[arg(long, value_enum, default_value_t = HttpMethod::Get)]
        method: HttpMethod,
        /// Upstream URL to call.
        url: String,
        /// Request body, sent as-is.
        #[arg(long)]
        body: Option<String>,
    },
}

/// Args shared by `register` and `update`.
#[derive(clap::Args, Debug, Clone)]
pub struct RegisterArgs {
    /// Unique server identifier.
    pub server: String,
    /// Provider backing this server's OAuth flows.
    #[arg(long, value_enum)]
    pub provider: ProviderArg,
    /// OAuth client id.
    #[arg(long)]
    pub client_id: String,
    /// OAuth client secret.
    #[arg(long)]
    pub client_secret: Option<String>,
    /// Requested scopes, comma-separated.
    #[arg(long, value_delimiter = ',')]
    pub scopes: Vec<String>,
    /// Redirect URI registered with the provider.
    #[arg(long)]
    pub redirect_uri: String,
    /// Tenant id (Microsoft); defaults to "common".
    #[arg(long)]
    pub tenant_id: Option<String>,
    /// Override the provider's authorize endpoint.
    #[arg(long)]
    pub auth_url: Option<String>,
    /// Override the provider's token endpoint.
    #[arg(long)]
    pub token_url: Option<String>,
}

/// Provider selector mirroring [`oauth_core::ProviderType`].
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ProviderArg {
    /// GitHub.
    Github,
    /// Google.
    Google,
    /// Microsoft.
    Microsoft,
    /// Any other provider registered under a custom key.
    Custom,
}

impl From<ProviderArg> for oauth_core::ProviderType {
    fn from(value: ProviderArg) -> Self {
        match value {
            ProviderArg::Github => oauth_core::ProviderType::Github,
            ProviderArg::Google => oauth_core::ProviderType::Google,
            ProviderArg::Microsoft => oauth_core::ProviderType::Microsoft,
            ProviderArg::Custom => oauth_core::ProviderType::Custom,
        }
    }
}

/// HTTP method selector for `server.oauth.request`.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum HttpMethod {
    /// GET.
    Get,
    /// POST.
    Post,
    /// PUT.
    Put,
    /// PATCH.
    Patch,
    /// DELETE.
    Delete,
}

impl From<HttpMethod> for http::Method {
    fn from(value: HttpMethod) -> Self {
        match value {
            HttpMethod::Get => http::Method::GET,
            HttpMethod::Post => http::Method::POST,
            HttpMethod::Put => http::Method::PUT,
            HttpMethod::Patch => http::Method::PATCH,
            HttpMethod::Delete => http::Method::DELETE,
        }
    }
}
