//! Step planning
//!
//! Pure translation of (current version, mode, migration set) into the ordered
//! list of steps the runner will execute. Nothing here touches a backend.

use std::str::FromStr;

use crate::error::{MigrateError, MigrateResult};
use crate::migration::Migration;
use crate::step::{Direction, Step};

/// How the target version is derived from the current one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Apply every pending migration
    ApplyAll,
    /// Apply the next `n` migrations
    ApplyN(usize),
    /// Revert the last `n` applied migrations
    RevertN(usize),
    /// Revert everything down to version 0
    RevertAll,
    /// Revert and re-apply the current migration
    Redo,
    /// Revert everything, then remove the version storage
    Drop,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::ApplyAll => write!(f, "apply-all"),
            Mode::ApplyN(n) => write!(f, "apply:{}", n),
            Mode::RevertN(n) => write!(f, "revert:{}", n),
            Mode::RevertAll => write!(f, "revert-all"),
            Mode::Redo => write!(f, "redo"),
            Mode::Drop => write!(f, "drop"),
        }
    }
}

impl FromStr for Mode {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        let parse_num = |raw: &str| {
            raw.parse::<usize>().map_err(|_| {
                MigrateError::config(format!("num must be a positive integer: {}", raw))
            })
        };

        match s.as_str() {
            "apply-all" | "up" => Ok(Mode::ApplyAll),
            "revert-all" | "down" => Ok(Mode::RevertAll),
            "redo" => Ok(Mode::Redo),
            "drop" => Ok(Mode::Drop),
            other => match other.split_once(':') {
                Some(("apply", n)) => Ok(Mode::ApplyN(parse_num(n)?)),
                Some(("revert", n)) => Ok(Mode::RevertN(parse_num(n)?)),
                _ => Err(MigrateError::config(format!("incorrect mode provided: {}", s))),
            },
        }
    }
}

/// Result of planning a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Version read from the backend
    pub from: u32,
    /// Version the backend holds once every step succeeded
    pub to: u32,
    /// Steps in execution order
    pub steps: Vec<Step>,
    /// Remove version storage after the steps (drop mode)
    pub drop_storage: bool,
}

/// Options that shape the steps without changing the target version
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanOptions {
    pub zig_zag: bool,
    pub disable_tx: bool,
}

/// Compute the ordered steps that bring `current` to the mode's target
///
/// `migrations` must already be sorted and validated.
pub fn plan(
    current: u32,
    mode: Mode,
    options: PlanOptions,
    migrations: &[Migration],
) -> MigrateResult<Plan> {
    let count = migrations.len();
    let out_of_bounds = |target: i64, reason: &'static str| MigrateError::OutOfBounds {
        current,
        target,
        count,
        reason,
    };

    let curr = current as i64;
    let max = count as i64;

    let target = match mode {
        Mode::ApplyAll => {
            if curr > max {
                return Err(out_of_bounds(max, "current is greater than target"));
            }
            max
        }
        Mode::ApplyN(n) => {
            let target = i64::try_from(n)
                .ok()
                .and_then(|n| curr.checked_add(n))
                .unwrap_or(i64::MAX);
            if target > max {
                return Err(out_of_bounds(target, "target is greater than migrations count"));
            }
            target
        }
        Mode::RevertN(n) => {
            let target = i64::try_from(n)
                .ok()
                .and_then(|n| curr.checked_sub(n))
                .unwrap_or(i64::MIN);
            if curr > max {
                return Err(out_of_bounds(target, "current is greater than migrations count"));
            }
            if target < 0 {
                return Err(out_of_bounds(target, "target is less than zero"));
            }
            target
        }
        Mode::RevertAll | Mode::Drop => {
            if curr > max {
                return Err(out_of_bounds(0, "current is greater than migrations count"));
            }
            0
        }
        Mode::Redo => {
            if curr > max {
                return Err(out_of_bounds(curr, "current is greater than migrations count"));
            }
            if curr == 0 {
                return Err(out_of_bounds(curr, "nothing to redo at version 0"));
            }
            curr
        }
    };
    let target = u32::try_from(target)
        .map_err(|_| out_of_bounds(target, "target does not fit a migration id"))?;

    let steps = if mode == Mode::Redo {
        let migration = &migrations[current as usize - 1];
        vec![
            migration.to_step(Direction::Revert, options.disable_tx),
            migration.to_step(Direction::Apply, options.disable_tx),
        ]
    } else {
        walk(current, target, options, migrations)
    };

    Ok(Plan {
        from: current,
        to: target,
        steps,
        drop_storage: mode == Mode::Drop,
    })
}

/// Walk one version at a time from `current` to `target`
fn walk(current: u32, target: u32, options: PlanOptions, migrations: &[Migration]) -> Vec<Step> {
    if current == target {
        return Vec::new();
    }

    let direction = if target > current {
        Direction::Apply
    } else {
        Direction::Revert
    };
    let per_unit = if options.zig_zag { 3 } else { 1 };
    let mut steps = Vec::with_capacity(current.abs_diff(target) as usize * per_unit);

    let mut curr = current;
    while curr != target {
        let idx = match direction {
            Direction::Apply => curr as usize,
            Direction::Revert => curr as usize - 1,
        };
        let migration = &migrations[idx];

        steps.push(migration.to_step(direction, options.disable_tx));
        if options.zig_zag {
            steps.push(migration.to_step(direction.opposite(), options.disable_tx));
            steps.push(migration.to_step(direction, options.disable_tx));
        }

        curr = match direction {
            Direction::Apply => curr + 1,
            Direction::Revert => curr - 1,
        };
    }

    steps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migrations(n: u32) -> Vec<Migration> {
        (1..=n)
            .map(|i| Migration::new(i, format!("m{}", i), format!("A{}", i), format!("R{}", i)))
            .collect()
    }

    fn summary(plan: &Plan) -> Vec<(u32, &str)> {
        plan.steps
            .iter()
            .map(|s| (s.version, s.query.as_str()))
            .collect()
    }

    #[test]
    fn test_apply_all_from_middle() {
        let plan = plan(1, Mode::ApplyAll, PlanOptions::default(), &migrations(3)).unwrap();
        assert_eq!(summary(&plan), vec![(2, "A2"), (3, "A3")]);
        assert_eq!(plan.to, 3);
        assert!(!plan.drop_storage);
    }

    #[test]
    fn test_apply_all_when_full_is_empty() {
        let plan = plan(3, Mode::ApplyAll, PlanOptions::default(), &migrations(3)).unwrap();
        assert!(plan.steps.is_empty());
        assert_eq!(plan.to, 3);
    }

    #[test]
    fn test_apply_n() {
        let plan = plan(1, Mode::ApplyN(1), PlanOptions::default(), &migrations(3)).unwrap();
        assert_eq!(summary(&plan), vec![(2, "A2")]);
    }

    #[test]
    fn test_apply_n_past_end_is_out_of_bounds() {
        let err = plan(2, Mode::ApplyN(2), PlanOptions::default(), &migrations(3)).unwrap_err();
        assert!(err.is_bounds());
    }

    #[test]
    fn test_apply_n_huge_count_is_out_of_bounds() {
        let err = plan(0, Mode::ApplyN(usize::MAX), PlanOptions::default(), &migrations(3)).unwrap_err();
        assert!(matches!(err, MigrateError::OutOfBounds { target: i64::MAX, .. }));

        let err = plan(2, Mode::ApplyN(i64::MAX as usize), PlanOptions::default(), &migrations(3))
            .unwrap_err();
        assert!(err.is_bounds());
    }

    #[test]
    fn test_revert_n_huge_count_is_out_of_bounds() {
        let err = plan(1, Mode::RevertN(usize::MAX), PlanOptions::default(), &migrations(3)).unwrap_err();
        assert!(matches!(err, MigrateError::OutOfBounds { target: i64::MIN, .. }));

        let err = plan(1, Mode::RevertN(i64::MAX as usize + 2), PlanOptions::default(), &migrations(3))
            .unwrap_err();
        assert!(matches!(err, MigrateError::OutOfBounds { reason: "target is less than zero", .. }));
    }

    #[test]
    fn test_revert_n() {
        let plan = plan(3, Mode::RevertN(2), PlanOptions::default(), &migrations(3)).unwrap();
        assert_eq!(summary(&plan), vec![(2, "R3"), (1, "R2")]);
        assert_eq!(plan.to, 1);
    }

    #[test]
    fn test_revert_n_below_zero_is_out_of_bounds() {
        let err = plan(1, Mode::RevertN(2), PlanOptions::default(), &migrations(3)).unwrap_err();
        assert!(matches!(err, MigrateError::OutOfBounds { target: -1, .. }));
    }

    #[test]
    fn test_revert_all_mirrors_apply_all() {
        let set = migrations(4);
        let up = plan(0, Mode::ApplyAll, PlanOptions::default(), &set).unwrap();
        let down = plan(4, Mode::RevertAll, PlanOptions::default(), &set).unwrap();

        let up_versions: Vec<u32> = up.steps.iter().map(|s| s.version).collect();
        let down_versions: Vec<u32> = down.steps.iter().map(|s| s.version).collect();
        assert_eq!(up_versions, vec![1, 2, 3, 4]);
        assert_eq!(down_versions, vec![3, 2, 1, 0]);
        assert_eq!(down.to, 0);
    }

    #[test]
    fn test_current_beyond_set_is_rejected_for_every_mode() {
        let set = migrations(2);
        for mode in [
            Mode::ApplyAll,
            Mode::ApplyN(1),
            Mode::RevertN(1),
            Mode::RevertAll,
            Mode::Redo,
            Mode::Drop,
        ] {
            let err = plan(5, mode, PlanOptions::default(), &set).unwrap_err();
            assert!(err.is_bounds(), "mode {} should fail", mode);
        }
    }

    #[test]
    fn test_redo_is_revert_then_apply() {
        let plan = plan(2, Mode::Redo, PlanOptions::default(), &migrations(3)).unwrap();
        assert_eq!(summary(&plan), vec![(1, "R2"), (2, "A2")]);
        assert_eq!(plan.to, 2);
    }

    #[test]
    fn test_redo_ignores_zig_zag() {
        let options = PlanOptions {
            zig_zag: true,
            disable_tx: false,
        };
        let plan = plan(3, Mode::Redo, options, &migrations(3)).unwrap();
        assert_eq!(plan.steps.len(), 2);
    }

    #[test]
    fn test_redo_at_zero_is_rejected() {
        let err = plan(0, Mode::Redo, PlanOptions::default(), &migrations(3)).unwrap_err();
        assert!(err.is_bounds());
    }

    #[test]
    fn test_zig_zag_up() {
        let options = PlanOptions {
            zig_zag: true,
            disable_tx: false,
        };
        let plan = plan(0, Mode::ApplyAll, options, &migrations(2)).unwrap();
        assert_eq!(
            summary(&plan),
            vec![(1, "A1"), (0, "R1"), (1, "A1"), (2, "A2"), (1, "R2"), (2, "A2")]
        );
        assert_eq!(plan.steps.last().map(|s| s.version), Some(2));
    }

    #[test]
    fn test_zig_zag_down() {
        let options = PlanOptions {
            zig_zag: true,
            disable_tx: false,
        };
        let plan = plan(1, Mode::RevertAll, options, &migrations(2)).unwrap();
        assert_eq!(summary(&plan), vec![(0, "R1"), (1, "A1"), (0, "R1")]);
    }

    #[test]
    fn test_drop_reverts_everything_and_flags_storage() {
        let plan = plan(2, Mode::Drop, PlanOptions::default(), &migrations(2)).unwrap();
        assert_eq!(summary(&plan), vec![(1, "R2"), (0, "R1")]);
        assert!(plan.drop_storage);
    }

    #[test]
    fn test_disable_tx_propagates_to_every_step() {
        let options = PlanOptions {
            zig_zag: true,
            disable_tx: true,
        };
        let plan = plan(0, Mode::ApplyAll, options, &migrations(3)).unwrap();
        assert!(plan.steps.iter().all(|s| s.disable_tx));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("apply-all".parse::<Mode>().unwrap(), Mode::ApplyAll);
        assert_eq!("apply:3".parse::<Mode>().unwrap(), Mode::ApplyN(3));
        assert_eq!("REVERT:2".parse::<Mode>().unwrap(), Mode::RevertN(2));
        assert_eq!("revert-all".parse::<Mode>().unwrap(), Mode::RevertAll);
        assert_eq!("redo".parse::<Mode>().unwrap(), Mode::Redo);
        assert_eq!("drop".parse::<Mode>().unwrap(), Mode::Drop);

        assert!("sideways".parse::<Mode>().unwrap_err().is_config());
        assert!("apply:x".parse::<Mode>().unwrap_err().is_config());
    }

    #[test]
    fn test_mode_display_round_trips() {
        for mode in [Mode::ApplyN(4), Mode::RevertN(1), Mode::Drop] {
            assert_eq!(mode.to_string().parse::<Mode>().unwrap(), mode);
        }
    }
}
