pub const CONFIG_PATH: &str = "./plankton.yaml";

pub const ENV_VAR_PREFIX: &str = "PLANKTON";

pub const ENV_VAR_SEPARATOR: &str = "__";
