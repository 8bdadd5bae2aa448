use std::fmt::Write;

/// Configuration for the Nginx reverse proxy site.
///
/// # Example
///
/// ```
/// use alicerce::Nginx;
///
/// let nginx = Nginx::new("127.0.0.1:8081")
///     .server_name("api.example.com")
///     .cors_preflight()
///     .client_max_body_size("10M");
///
/// assert!(nginx.cors_preflight);
/// assert_eq!(nginx.upstream, "127.0.0.1:8081");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nginx {
    pub upstream: String,
    pub listen: u16,
    pub server_name: String,
    pub cors_preflight: bool,
    pub client_max_body_size: Option<String>,
    pub access_log: Option<String>,
    pub error_log: Option<String>,
    pub extra_directives: Vec<String>,
}

impl Nginx {
    #[must_use]
    pub fn new(upstream: &str) -> Self {
        Self {
            upstream: upstream.to_string(),
            listen: 80,
            server_name: "_".to_string(),
            cors_preflight: false,
            client_max_body_size: None,
            access_log: None,
            error_log: None,
            extra_directives: Vec::new(),
        }
    }

    #[must_use]
    pub fn server_name(mut self, name: &str) -> Self {
        self.server_name = name.to_string();
        self
    }

    /// Answer `OPTIONS` requests with 204 and permissive CORS
    /// headers instead of proxying them.
    #[must_use]
    pub const fn cors_preflight(mut self) -> Self {
        self.cors_preflight = true;
        self
    }

    #[must_use]
    pub fn client_max_body_size(mut self, size: &str) -> Self {
        self.client_max_body_size = Some(size.to_string());
        self
    }

    #[must_use]
    pub fn logs(mut self, access: &str, error: &str) -> Self {
        self.access_log = Some(access.to_string());
        self.error_log = Some(error.to_string());
        self
    }

    #[must_use]
    pub fn directive(mut self, raw: &str) -> Self {
        self.extra_directives.push(raw.to_string());
        self
    }

    /// Render the complete `server` block.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "server {{");
        let _ = writeln!(out, "    listen {};", self.listen);
        let _ = writeln!(out, "    server_name {};", self.server_name);

        if let Some(size) = &self.client_max_body_size {
            let _ = writeln!(out, "    client_max_body_size {size};");
        }
        if let Some(log) = &self.access_log {
            let _ = writeln!(out, "    access_log {log};");
        }
        if let Some(log) = &self.error_log {
            let _ = writeln!(out, "    error_log {log};");
        }
        for d in &self.extra_directives {
            let _ = writeln!(out, "    {d};");
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "    location / {{");

        if self.cors_preflight {
            let _ = writeln!(out, "        if ($request_method = OPTIONS) {{");
            let _ = writeln!(
                out,
                "            add_header Access-Control-Allow-Origin * always;"
            );
            let _ = writeln!(
                out,
                "            add_header Access-Control-Allow-Methods \
                 \"GET, POST, PUT, PATCH, DELETE, OPTIONS\" always;"
            );
            let _ = writeln!(
                out,
                "            add_header Access-Control-Allow-Headers \
                 \"Authorization, Content-Type, Accept, Origin, X-Requested-With\" always;"
            );
            let _ = writeln!(
                out,
                "            add_header Access-Control-Max-Age 86400 always;"
            );
            let _ = writeln!(out, "            return 204;");
            let _ = writeln!(out, "        }}");
            let _ = writeln!(out);
        }

        let _ = writeln!(out, "        proxy_pass http://{};", self.upstream);
        let _ = writeln!(out, "        proxy_http_version 1.1;");
        let _ = writeln!(out, "        proxy_set_header Host $host;");
        let _ = writeln!(out, "        proxy_set_header X-Real-IP $remote_addr;");
        let _ = writeln!(
            out,
            "        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;"
        );
        let _ = writeln!(out, "        proxy_set_header X-Forwarded-Proto $scheme;");
        let _ = writeln!(out, "        proxy_set_header X-Forwarded-Host $host;");
        let _ = writeln!(out, "        proxy_read_timeout 60s;");
        let _ = writeln!(out, "    }}");
        let _ = writeln!(out, "}}");

        out
    }
}
