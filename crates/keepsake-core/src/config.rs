use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

const DEFAULTS: &[(&str, &str)] = &[
  ("data.location", "~/.keepsake"),
  ("default.command", "list"),
  ("color", "on"),
  ("delivery.max_pending", "64")
];

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Config {
  /// Built-in keys only; no rc file
  /// is consulted.
  pub fn defaults() -> Self {
    Self {
      map:          DEFAULTS
        .iter()
        .map(|(k, v)| {
          (k.to_string(), v.to_string())
        })
        .collect(),
      loaded_files: vec![]
    }
  }

  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Self::defaults();

    let rc = resolve_rc_path(
      rc_override
    )?;
    if let Some(path) = rc {
      info!(keepsakerc = %path.display(), "loading keepsakerc");
      cfg.load_file(&path)?;
    } else {
      warn!(
        "no keepsakerc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  pub fn get_usize(
    &self,
    key: &str
  ) -> anyhow::Result<Option<usize>> {
    self
      .map
      .get(key)
      .map(|v| {
        v.trim().parse::<usize>().with_context(
          || {
            format!(
              "{key} must be a \
               non-negative integer, \
               got {v}"
            )
          }
        )
      })
      .transpose()
  }

  /// Keys in sorted order.
  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    let mut entries: Vec<_> =
      self.map.iter().collect();
    entries.sort();
    entries.into_iter()
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    if self.loaded_files.contains(&path)
    {
      warn!(file = %path.display(), "include cycle; skipping");
      return Ok(());
    }

    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;
    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .unwrap_or_else(|| Path::new("."))
      .to_path_buf();

    for (idx, raw_line) in
      text.lines().enumerate()
    {
      let parsed = parse_rc_line(raw_line)
        .with_context(|| {
          format!(
            "invalid config line {}:{}",
            path.display(),
            idx + 1
          )
        })?;

      match parsed {
        | RcLine::Blank => {}
        | RcLine::Include(target) => {
          let target =
            resolve_include_path(
              &base_dir, target
            )?;
          if target.exists() {
            self.load_file(&target)?;
          } else {
            warn!(include = %target.display(), "include file does not exist; skipping");
          }
        }
        | RcLine::Setting(key, value) => {
          if !is_known_key(key) {
            warn!(
              file = %path.display(),
              line = idx + 1,
              key,
              "unrecognised keepsakerc key"
            );
          }
          trace!(key, value, "loaded config key");
          self.map.insert(
            key.to_string(),
            value.to_string()
          );
        }
      }
    }

    Ok(())
  }
}

/// One keepsakerc line with any `#`
/// comment removed.
#[derive(Debug, PartialEq, Eq)]
enum RcLine<'a> {
  Blank,
  Include(&'a str),
  Setting(&'a str, &'a str)
}

fn parse_rc_line(
  raw: &str
) -> anyhow::Result<RcLine<'_>> {
  let line = raw
    .split_once('#')
    .map_or(raw, |(before, _)| before)
    .trim();

  if line.is_empty() {
    return Ok(RcLine::Blank);
  }
  if let Some(target) =
    line.strip_prefix("include ")
  {
    return Ok(RcLine::Include(
      target.trim()
    ));
  }

  match line.split_once('=') {
    | Some((key, value))
      if !key.trim().is_empty() =>
    {
      Ok(RcLine::Setting(
        key.trim(),
        value.trim()
      ))
    }
    | _ => {
      Err(anyhow!(
        "expected KEY = VALUE or \
         include PATH, got: {raw}"
      ))
    }
  }
}

/// Key families keepsake reads.
const KNOWN_KEYS: &[&str] = &[
  "calendar.",
  "color",
  "data.",
  "default.",
  "delivery.",
  "quiet.",
  "reminders."
];

fn is_known_key(key: &str) -> bool {
  KNOWN_KEYS.iter().any(|known| {
    match known.strip_suffix('.') {
      | Some(_) => key.starts_with(known),
      | None => key == *known
    }
  })
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var("KEEPSAKERC")
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    debug!(
      "no home directory; skipping \
       ~/.keepsakerc"
    );
    return Ok(None);
  };
  let candidate =
    home.join(".keepsakerc");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(".keepsake"))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let expanded =
    expand_tilde(Path::new(include));
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

pub(crate) fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

pub(crate) fn parse_bool(
  s: &str
) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}

#[cfg(test)]
mod tests {
  use std::fs;

  use tempfile::tempdir;

  use super::{
    Config,
    RcLine,
    is_known_key,
    parse_bool,
    parse_rc_line
  };

  #[test]
  fn rc_file_with_include_and_comments()
  {
    let temp =
      tempdir().expect("tempdir");
    let extra =
      temp.path().join("quiet.rc");
    fs::write(
      &extra,
      "quiet.start = 23:00\n"
    )
    .expect("write include");
    let rc =
      temp.path().join("keepsakerc");
    fs::write(
      &rc,
      "# reminders\nreminders.offsets \
       = 1d,0d # trailing\ninclude \
       quiet.rc\ninclude missing.rc\n"
    )
    .expect("write rc");

    let cfg = Config::load(Some(rc.as_path()))
      .expect("load rc");
    assert_eq!(
      cfg.get("reminders.offsets"),
      Some("1d,0d".to_string())
    );
    assert_eq!(
      cfg.get("quiet.start"),
      Some("23:00".to_string())
    );
    assert_eq!(
      cfg.get("default.command"),
      Some("list".to_string())
    );
    assert_eq!(cfg.loaded_files.len(), 2);
  }

  #[test]
  fn malformed_line_is_an_error() {
    let temp =
      tempdir().expect("tempdir");
    let rc = temp.path().join("bad.rc");
    fs::write(&rc, "no equals sign\n")
      .expect("write rc");
    let err = Config::load(Some(rc.as_path()))
      .expect_err("malformed line");
    assert!(
      err
        .to_string()
        .contains("invalid config line")
    );
  }

  #[test]
  fn overrides_strip_rc_prefix() {
    let mut cfg = Config::defaults();
    cfg.apply_overrides([(
      "rc.delivery.max_pending"
        .to_string(),
      "8".to_string()
    )]);
    assert_eq!(
      cfg
        .get_usize("delivery.max_pending")
        .expect("numeric"),
      Some(8)
    );

    cfg.apply_overrides([(
      "delivery.max_pending".to_string(),
      "lots".to_string()
    )]);
    assert!(
      cfg
        .get_usize("delivery.max_pending")
        .is_err()
    );
  }

  #[test]
  fn bool_spellings() {
    assert!(parse_bool("on"));
    assert!(parse_bool(" Yes "));
    assert!(!parse_bool("off"));
    assert!(!parse_bool("nope"));
  }

  #[test]
  fn rc_lines_classify() {
    assert_eq!(
      parse_rc_line("  # just a note")
        .expect("comment"),
      RcLine::Blank
    );
    assert_eq!(
      parse_rc_line("include ~/shared.rc")
        .expect("include"),
      RcLine::Include("~/shared.rc")
    );
    assert_eq!(
      parse_rc_line(
        "quiet.end = 07:30 # weekdays"
      )
      .expect("setting"),
      RcLine::Setting("quiet.end", "07:30")
    );
    assert!(parse_rc_line("= 5").is_err());
  }

  #[test]
  fn known_key_families() {
    assert!(is_known_key("color"));
    assert!(is_known_key("quiet.start"));
    assert!(is_known_key(
      "delivery.max_pending"
    ));
    assert!(!is_known_key("colour"));
    assert!(!is_known_key("calendar"));
  }
}
