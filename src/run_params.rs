//! Run parameter resolution.
//!
//! Turns a game plus user preferences into the concrete parameters of one
//! launch: the effective profile, the final argument string, the window
//! configuration and the ordered list of patches to apply.

use uuid::Uuid;

use crate::errors::{LauncherError, Result};
use crate::games::{Game, GameManager};
use crate::patches::PatchList;
use crate::profiles::Profile;

/// Concrete parameters of one launch.
#[derive(Debug, Clone)]
pub struct RunParams {
    pub profile: Profile,
    pub run_arguments: String,
    pub width: u32,
    pub height: u32,
    pub full_screen: bool,
    /// Patches in application order.
    pub patches: PatchList,
}

impl RunParams {
    /// Resolve the launch parameters for `game`.
    ///
    /// The profile precedence is game active profile, game custom profile,
    /// launcher active profile, default profile. A game-requested window
    /// size forces windowed mode at exactly that size.
    pub fn resolve(game: &Game, manager: &GameManager, patches: &PatchList) -> Result<RunParams> {
        let profile = manager
            .profile_to_use(game)
            .cloned()
            .ok_or_else(|| LauncherError::not_found("no profile available for game"))?;

        let run_arguments = compose_run_arguments(&game.run_arguments, &profile);

        let (width, height, full_screen) = match game.window_size {
            Some((width, height)) => (width, height, false),
            None => (profile.width, profile.height, profile.full_screen),
        };

        let patches = find_patches(game, game.use_latest_patch, game.use_custom_patch, patches)?;

        Ok(RunParams {
            profile,
            run_arguments,
            width,
            height,
            full_screen,
            patches,
        })
    }
}

/// Compose the final argument string.
///
/// Contract: with `replace_run_arguments` set, the profile arguments are
/// used alone; otherwise the result is the game arguments followed by a
/// single space and the profile arguments, with empty parts collapsed.
pub fn compose_run_arguments(game_arguments: &str, profile: &Profile) -> String {
    if profile.replace_run_arguments {
        return profile.run_arguments.clone();
    }
    if game_arguments.is_empty() {
        return profile.run_arguments.clone();
    }
    if profile.run_arguments.is_empty() {
        return game_arguments.to_string();
    }
    format!("{} {}", game_arguments, profile.run_arguments)
}

/// Resolve the patch list for a launch.
///
/// `use_latest` collects every patch targeting the game in dependency
/// order. A pinned patch selects its whole prerequisite chain, walking
/// backwards and accepting the first present patch of each requirement set
/// (requirements have OR semantics). No preference selects no patches.
pub fn find_patches(
    game: &Game,
    use_latest: bool,
    pinned: Option<Uuid>,
    all_patches: &PatchList,
) -> Result<PatchList> {
    let mut collected = PatchList::new();
    for patch in all_patches.iter() {
        if patch.game_id == game.identifier && patch.game_id.is_some() {
            collected.add(patch.clone());
        }
    }

    if use_latest {
        return Ok(sort_patches(&collected));
    }

    let pinned = match pinned {
        Some(pinned) => pinned,
        None => return Ok(PatchList::new()),
    };

    let mut current = collected.get_with_id(pinned).ok_or_else(|| {
        LauncherError::DependencyUnresolved(format!(
            "No patch found with identifier '{}'",
            pinned.simple()
        ))
    })?;

    let mut chain = PatchList::new();
    chain.add(current.clone());

    while !current.required_patches.is_empty() {
        let next = current
            .required_patches
            .iter()
            .find_map(|required| collected.get_with_id(*required));

        match next {
            Some(found) => {
                let id = found.identifier;
                if id.map(|id| chain.has_with_id(id)).unwrap_or(false) {
                    break; // cyclic requirements, the chain is complete
                }
                chain.add(found.clone());
                current = found;
            }
            None => {
                let candidates: Vec<String> = current
                    .required_patches
                    .iter()
                    .map(|id| format!("'{}'", id.simple()))
                    .collect();
                return Err(LauncherError::DependencyUnresolved(format!(
                    "Required patches not found for patch with identifier '{}'. Requires one of: {}",
                    current.identifier_hex(),
                    candidates.join(", ")
                )));
            }
        }
    }

    Ok(sort_patches(&chain))
}

/// Order patches so that every patch appears after at least one of its
/// required patches: repeatedly append any patch whose required set is empty
/// or intersects the already appended ones, until a pass adds nothing.
/// Patches with unsatisfiable requirements are left out.
pub fn sort_patches(patches: &PatchList) -> PatchList {
    let mut sorted = PatchList::new();
    let mut added = true;

    while added {
        added = false;

        for patch in patches.iter() {
            if patch
                .identifier
                .map(|id| sorted.has_with_id(id))
                .unwrap_or(false)
            {
                continue;
            }

            if !patch.required_patches.is_empty()
                && !patch
                    .required_patches
                    .iter()
                    .any(|required| sorted.has_with_id(*required))
            {
                continue;
            }

            sorted.add(patch.clone());
            added = true;
        }
    }

    sorted
}
