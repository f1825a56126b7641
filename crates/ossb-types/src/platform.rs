use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// `(os, arch, variant?, os_version?, os_features[], features[])`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub arch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub os_features: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
            variant: None,
            os_version: None,
            os_features: Vec::new(),
            features: Vec::new(),
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    pub fn linux_amd64() -> Self {
        Self::new("linux", "amd64")
    }

    pub fn linux_arm64() -> Self {
        Self::new("linux", "arm64")
    }

    /// Exact match: every nonzero field equal.
    pub fn matches(&self, other: &Platform) -> bool {
        self.os == other.os
            && self.arch == other.arch
            && field_eq(&self.variant, &other.variant)
            && field_eq(&self.os_version, &other.os_version)
    }

    /// Whether a host declaring `self` can run an image built for
    /// `image_platform`, per the partial order in `spec.md` §3: `amd64`
    /// runs `386`; `arm64` runs `arm/v8`; ARM variants satisfy
    /// `v8 ⊇ v7 ⊇ v6`. OS mismatch is never compatible.
    pub fn can_run(&self, image_platform: &Platform) -> bool {
        if self.os != image_platform.os {
            return false;
        }
        if self.arch == image_platform.arch {
            return arm_variant_compatible(self, image_platform);
        }
        match (self.arch.as_str(), image_platform.arch.as_str()) {
            ("amd64", "386") => true,
            ("arm64", "arm") => arm_variant_compatible(self, image_platform),
            _ => false,
        }
    }
}

fn field_eq(a: &Option<String>, b: &Option<String>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

fn arm_rank(variant: Option<&str>) -> u8 {
    match variant {
        Some("v8") => 3,
        Some("v7") => 2,
        Some("v6") => 1,
        _ => 0,
    }
}

fn arm_variant_compatible(host: &Platform, image: &Platform) -> bool {
    if image.arch != "arm" && image.arch != "arm64" {
        return true;
    }
    let host_rank = if host.arch == "arm64" {
        3
    } else {
        arm_rank(host.variant.as_deref())
    };
    let image_rank = arm_rank(image.variant.as_deref().or(Some("v7")));
    host_rank >= image_rank
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{variant}")?;
        }
        Ok(())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        let os = parts.next().filter(|s| !s.is_empty());
        let arch = parts.next().filter(|s| !s.is_empty());
        let variant = parts.next();
        if parts.next().is_some() {
            return Err(format!("invalid platform string {s:?}"));
        }
        match (os, arch) {
            (Some(os), Some(arch)) => {
                let mut p = Platform::new(os, arch);
                if let Some(v) = variant {
                    p.variant = Some(v.to_string());
                }
                Ok(p)
            }
            _ => Err(format!("invalid platform string {s:?}: expected os/arch[/variant]")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays_round_trip() {
        let p: Platform = "linux/arm64/v8".parse().unwrap();
        assert_eq!(p.to_string(), "linux/arm64/v8");
    }

    #[test]
    fn amd64_runs_386() {
        assert!(Platform::linux_amd64().can_run(&Platform::new("linux", "386")));
        assert!(!Platform::new("linux", "386").can_run(&Platform::linux_amd64()));
    }

    #[test]
    fn arm64_runs_armv8_but_not_reverse() {
        let arm64 = Platform::linux_arm64();
        let armv8 = Platform::new("linux", "arm").with_variant("v8");
        let armv6 = Platform::new("linux", "arm").with_variant("v6");
        assert!(arm64.can_run(&armv8));
        assert!(arm64.can_run(&armv6));
        assert!(!armv6.can_run(&armv8));
    }

    #[test]
    fn os_mismatch_never_compatible() {
        assert!(!Platform::linux_amd64().can_run(&Platform::new("windows", "amd64")));
    }

    #[test]
    fn exact_match_requires_equal_nonzero_fields() {
        let a = Platform::new("linux", "arm").with_variant("v7");
        let b = Platform::new("linux", "arm").with_variant("v7");
        let c = Platform::new("linux", "arm").with_variant("v6");
        assert!(a.matches(&b));
        assert!(!a.matches(&c));
    }
}
