//! `landjail`: the unprivileged fallback that skips namespace/veth setup
//! entirely and steers the target via proxy environment variables instead
//! (spec §6, §9 — "an alternative to the network-namespace core, not part
//! of it"). Grounded on the teacher's env convention and
//! `zed-industries-codex::network_proxy::apply_proxy_env_overrides` for
//! the set-every-casing-variant pattern.

use std::collections::HashMap;

const PROXY_ENV_KEYS: &[&str] = &["HTTP_PROXY", "HTTPS_PROXY", "http_proxy", "https_proxy"];

/// Points every HTTP(S)_PROXY variant at the in-process proxy. Unlike the
/// jail, which intercepts traffic transparently, a `landjail` target must
/// cooperate by actually reading these variables.
pub fn apply_proxy_env(env: &mut HashMap<String, String>, proxy_port: u16) {
    let proxy_url = format!("http://localhost:{proxy_port}");
    for key in PROXY_ENV_KEYS {
        env.insert((*key).to_string(), proxy_url.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sets_all_four_casing_variants() {
        let mut env = HashMap::new();
        apply_proxy_env(&mut env, 8080);
        for key in PROXY_ENV_KEYS {
            assert_eq!(env.get(*key).map(String::as_str), Some("http://localhost:8080"));
        }
    }
}
