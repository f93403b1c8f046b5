use std::fmt;

/// One API key with its own independent RPM quota.
///
/// Identity is the 1-based `index`; the secret is only readable through
/// [`Credential::secret`] and never shows up in `Debug` or `Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub index: usize,
    secret: String,
    pub masked: String,
}

impl Credential {
    pub fn new(index: usize, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        let masked = mask_secret(&secret);
        Self {
            index,
            secret,
            masked,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("index", &self.index)
            .field("masked", &self.masked)
            .finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key #{} ({})", self.index, self.masked)
    }
}

/// `AIzaSy...WXYZ` style display form.
fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 10 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masking() {
        let key = Credential::new(3, "AIzaSyDxxxxxxxxxxxxxxWXYZ");
        assert_eq!(key.masked, "AIzaSy...WXYZ");
        assert_eq!(key.to_string(), "Key #3 (AIzaSy...WXYZ)");
    }

    #[test]
    fn test_short_secret_fully_masked() {
        assert_eq!(Credential::new(1, "abc").masked, "***");
    }

    #[test]
    fn test_debug_hides_secret() {
        let key = Credential::new(1, "AIzaSyDsupersecretvalue1234");
        let debug = format!("{key:?}");
        assert!(!debug.contains("supersecret"));
        assert!(debug.contains("index: 1"));
    }
}
