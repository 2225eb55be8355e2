//! Profile requests

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use super::Inner;
use crate::events::{cause, ProfileCreationError, ProfileEvent};
use crate::ids::ProfileId;
use crate::profiles::{Preferences, ProfileDatabaseError};
use crate::provider::AccountProvider;

pub(super) fn create(
    inner: &Inner,
    provider: Arc<AccountProvider>,
    display_name: String,
    date_of_birth: Option<NaiveDate>,
) -> ProfileEvent {
    let result = inner.write_profiles().create_profile(
        provider,
        &display_name,
        date_of_birth,
        inner.providers.as_ref(),
    );

    let event = match result {
        Ok(id) => {
            info!(profile = %id, "profile created");
            ProfileEvent::ProfileCreated { id, display_name }
        }
        Err(e) => {
            let error = match &e {
                ProfileDatabaseError::DuplicateName(_) => ProfileCreationError::DuplicateName,
                ProfileDatabaseError::AnonymousProfileEnabled => {
                    ProfileCreationError::AnonymousProfileEnabled
                }
                _ => ProfileCreationError::Io,
            };
            warn!(name = %display_name, "profile creation failed: {}", e);
            ProfileEvent::ProfileCreationFailed {
                display_name,
                error,
                cause: cause(e),
            }
        }
    };
    inner.publish_profile(event)
}

pub(super) fn select(inner: &Inner, id: ProfileId) -> Result<(), ProfileDatabaseError> {
    inner.write_profiles().set_current(id)
}

pub(super) fn update_preferences(
    inner: &Inner,
    preferences: Preferences,
) -> Result<(), ProfileDatabaseError> {
    let mut profiles = inner.write_profiles();
    let profile = profiles
        .current_profile_mut()
        .ok_or(ProfileDatabaseError::NoCurrentProfile)?;
    profile.set_preferences(preferences)?;
    debug!(profile = %profile.id(), "preferences updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::events::{ProfileCreationError, ProfileEvent};
    use crate::ids::ProfileId;
    use crate::profiles::{FontFamily, Preferences, ProfileDatabaseError, ProfilesMode};
    use crate::test_support::Harness;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_create_and_select() {
        let harness = Harness::new(ProfilesMode::Multi);
        let controller = &harness.controller;
        let mut events = controller.profile_events();
        let provider = controller.providers().default_provider();

        let event = controller
            .profile_create(provider, "Kermit", None)
            .await
            .unwrap();
        let ProfileEvent::ProfileCreated { id, .. } = event else {
            panic!("unexpected event: {}", event);
        };
        assert_eq!(id, ProfileId::new(0));
        assert!(matches!(
            events.try_recv(),
            Some(ProfileEvent::ProfileCreated { .. })
        ));

        controller.profile_select(id).await.unwrap().unwrap();
        assert_eq!(controller.with_profiles(|p| p.current()), Some(id));

        let missing = controller
            .profile_select(ProfileId::new(9))
            .await
            .unwrap();
        assert!(matches!(
            missing,
            Err(ProfileDatabaseError::ProfileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_name_fails() {
        let harness = Harness::new(ProfilesMode::Multi);
        let controller = &harness.controller;
        let provider = controller.providers().default_provider();

        controller
            .profile_create(provider.clone(), "Kermit", None)
            .await
            .unwrap();
        let event = controller
            .profile_create(provider, "Kermit", None)
            .await
            .unwrap();

        assert!(matches!(
            event,
            ProfileEvent::ProfileCreationFailed {
                error: ProfileCreationError::DuplicateName,
                ..
            }
        ));
        assert_eq!(controller.with_profiles(|p| p.profiles().len()), 1);
    }

    #[tokio::test]
    async fn test_anonymous_mode_rejects_creation() {
        let harness = Harness::new(ProfilesMode::Anonymous);
        let controller = &harness.controller;

        let event = controller
            .profile_create(controller.providers().default_provider(), "Kermit", None)
            .await
            .unwrap();
        assert!(matches!(
            event,
            ProfileEvent::ProfileCreationFailed {
                error: ProfileCreationError::AnonymousProfileEnabled,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_update_preferences() {
        let harness = Harness::new(ProfilesMode::Anonymous);
        let controller = &harness.controller;

        let mut preferences = Preferences::default()
            .with_date_of_birth(NaiveDate::from_ymd_opt(2016, 3, 14));
        preferences.reader.font_family = FontFamily::OpenDyslexic;
        controller
            .profile_update_preferences(preferences.clone())
            .await
            .unwrap()
            .unwrap();

        let stored = controller.with_profiles(|p| p.current_profile().unwrap().preferences().clone());
        assert_eq!(stored, preferences);
    }

    #[tokio::test]
    async fn test_update_preferences_without_profile() {
        let harness = Harness::new(ProfilesMode::Multi);
        let result = harness
            .controller
            .profile_update_preferences(Preferences::default())
            .await
            .unwrap();
        assert!(matches!(result, Err(ProfileDatabaseError::NoCurrentProfile)));
    }
}
