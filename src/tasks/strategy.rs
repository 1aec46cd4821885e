use crate::domain::{
    ActionThresholds, Backend, Score, ScoreResult, Strategy, Verdict, VerdictFailure,
};

/// Reduces the per-backend results into one verdict. `None` means the backend
/// is disabled and was never asked.
pub fn decide(
    strategy: Strategy,
    thresholds: &ActionThresholds,
    primary: Option<ScoreResult>,
    secondary: Option<ScoreResult>,
) -> Verdict {
    match strategy {
        Strategy::Average => average(thresholds, primary, secondary),
        Strategy::Lowest => pick(primary, secondary, |p, s| p.score < s.score),
        Strategy::Highest => pick(primary, secondary, |p, s| p.score > s.score),
        Strategy::Spamd => single(strategy, Backend::Spamd, primary),
        Strategy::Rspamd => single(strategy, Backend::Rspamd, secondary),
    }
}

/// Collapses two optional results into the successful scores, or the failure
/// to report when none succeeded. The primary's failure wins over the secondary's.
fn successes(
    primary: Option<ScoreResult>,
    secondary: Option<ScoreResult>,
) -> Result<(Option<Score>, Option<Score>), VerdictFailure> {
    match (primary, secondary) {
        (None, None) => Err(VerdictFailure::NoBackendEnabled),
        (Some(Err(err)), None | Some(Err(_))) => Err(err.into()),
        (None, Some(Err(err))) => Err(err.into()),
        (primary, secondary) => Ok((
            primary.and_then(Result::ok),
            secondary.and_then(Result::ok),
        )),
    }
}

fn average(
    thresholds: &ActionThresholds,
    primary: Option<ScoreResult>,
    secondary: Option<ScoreResult>,
) -> Verdict {
    let score = match successes(primary, secondary) {
        Err(failure) => return Verdict::failed(failure),
        Ok((Some(p), Some(s))) => (p.score + s.score) / 2.0,
        Ok((Some(only), None)) | Ok((None, Some(only))) => only.score,
        Ok((None, None)) => return Verdict::failed(VerdictFailure::NoBackendEnabled),
    };
    Verdict::new(score, thresholds.action_for(score))
}

/// Keeps the primary when `prefer_primary` holds, otherwise the secondary.
fn pick(
    primary: Option<ScoreResult>,
    secondary: Option<ScoreResult>,
    prefer_primary: impl Fn(&Score, &Score) -> bool,
) -> Verdict {
    match successes(primary, secondary) {
        Err(failure) => Verdict::failed(failure),
        Ok((Some(p), Some(s))) => {
            if prefer_primary(&p, &s) {
                p.into()
            } else {
                s.into()
            }
        }
        Ok((Some(only), None)) | Ok((None, Some(only))) => only.into(),
        Ok((None, None)) => Verdict::failed(VerdictFailure::NoBackendEnabled),
    }
}

fn single(strategy: Strategy, backend: Backend, result: Option<ScoreResult>) -> Verdict {
    match result {
        None => Verdict::failed(VerdictFailure::BackendDisabled { strategy, backend }),
        Some(Ok(score)) => score.into(),
        Some(Err(err)) => Verdict::failed(err),
    }
}
