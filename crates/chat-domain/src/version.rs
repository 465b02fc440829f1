//! Avance de versión al publicar un flujo.

/// Bump del componente minor: `1.0.0` → `1.1.0`. Formatos inválidos caen en
/// `1.1.0`, igual que versiones con menos de dos componentes.
pub fn bump_minor(version: &str) -> String {
    let parts: Vec<&str> = version.split('.').collect();
    if parts.len() >= 2 {
        if let Ok(minor) = parts[1].parse::<u64>() {
            let patch = parts.get(2).copied().unwrap_or("0");
            return format!("{}.{}.{}", parts[0], minor + 1, patch);
        }
    }
    "1.1.0".to_string()
}

#[cfg(test)]
mod tests {
    use super::bump_minor;

    #[test]
    fn bumps_minor_keeping_major_and_patch() {
        assert_eq!(bump_minor("1.0.0"), "1.1.0");
        assert_eq!(bump_minor("2.7.3"), "2.8.3");
        assert_eq!(bump_minor("3.4"), "3.5.0");
    }

    #[test]
    fn invalid_versions_fall_back() {
        assert_eq!(bump_minor("garbage"), "1.1.0");
        assert_eq!(bump_minor("1.x.0"), "1.1.0");
        assert_eq!(bump_minor(""), "1.1.0");
    }
}
