//! Default TOML config template with inline documentation comments.

/// Generate the default TOML config content with comments.
pub(crate) fn default_config_toml() -> String {
    r##"# Parley Configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[api]
# base_url = "http://localhost:8000"
# connect_timeout_secs = 10   # 1-300
# request_timeout_secs = 30   # 1-600, REST calls
# max_stream_secs = 300       # 1-86400, total time one reply may stream
# token_env = "PARLEY_TOKEN"  # env var holding the bearer token

[generation]
# model = "typhoon-v1.5-instruct"
# output_length = 512         # 1-32768
# temperature = 0.7           # 0.0-2.0
# top_p = 0.7                 # 0.0-1.0
# top_k = 50                  # 1-1000
# repetition_penalty = 1.0    # 0.5-2.0

[logging]
# level = "INFO"              # DEBUG, INFO, WARNING, ERROR
"##
    .to_string()
}
