//! User-Agent classification for the `os`, `browser` and `version` subrefs.

/// Identification derived once from the User-Agent request header.
#[derive(Debug, Clone, Default)]
pub(crate) struct UserAgent {
    pub raw: String,
    pub os: &'static str,
    pub browser: &'static str,
    pub version: String,
}

impl UserAgent {
    pub fn identify(raw: &str) -> Self {
        UserAgent {
            raw: raw.to_string(),
            os: identify_os(raw),
            browser: identify_browser(raw),
            version: identify_version(raw),
        }
    }
}

fn identify_os(ua: &str) -> &'static str {
    if ua.contains("Windows") {
        "WIN"
    } else if ua.contains("Mac") {
        "MAC"
    } else if ua.contains("Linux") || ua.contains("X11") || ua.contains("nix") || ua.contains("BSD")
    {
        "UNIX"
    } else {
        "OTHER"
    }
}

fn identify_browser(ua: &str) -> &'static str {
    if ua.contains("MSIE") {
        "MSIE"
    } else if ua.contains("Mozilla") {
        "MOZILLA"
    } else {
        "OTHER"
    }
}

fn identify_version(ua: &str) -> String {
    if let Some(tail) = ua.split("MSIE").nth(1) {
        // "MSIE 6.0; ..." -> the token between the space and the ';'
        match tail.strip_prefix(' ').or_else(|| {
            tail.find(' ').map(|i| &tail[i + 1..])
        }) {
            Some(rest) => rest.split(';').next().unwrap_or("").to_string(),
            None => String::new(),
        }
    } else if let Some(tail) = ua.split('/').nth(1) {
        // Product version: "Mozilla/4.0 (..." -> "4.0"
        const DELIMS: &str = " \r\n()<>@,;:\\\"/[]?={}\t";
        tail.chars().take_while(|c| !DELIMS.contains(*c)).collect()
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_msie_on_windows() {
        let ua = UserAgent::identify("Mozilla/4.0 (compatible; MSIE 6.0; Windows NT 5.1)");
        assert_eq!(ua.os, "WIN");
        assert_eq!(ua.browser, "MSIE");
        assert_eq!(ua.version, "6.0");
    }

    #[test]
    fn classifies_mozilla_products() {
        let ua = UserAgent::identify("Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101");
        assert_eq!(ua.os, "UNIX");
        assert_eq!(ua.browser, "MOZILLA");
        assert_eq!(ua.version, "5.0");
    }

    #[test]
    fn unknown_agents_fall_back() {
        let ua = UserAgent::identify("curl");
        assert_eq!(ua.os, "OTHER");
        assert_eq!(ua.browser, "OTHER");
        assert_eq!(ua.version, "");
    }
}
