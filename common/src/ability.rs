use log::{info, warn};

use crate::{
    client::{HttpTransport, SignedRequestClient},
    endpoints::{ABILITY_LINKAGE_WHITE_LIGHT, ABILITY_LINK_DEV_ALARM, ABILITY_MOTION_DETECT},
    types::AlarmState,
};

/// Maps arm/disarm onto the camera abilities tied to the lock.
pub struct AbilityController<T> {
    client: SignedRequestClient<T>,
}

impl<T: HttpTransport> AbilityController<T> {
    pub fn new(client: SignedRequestClient<T>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &SignedRequestClient<T> {
        &self.client
    }

    pub fn forget_token(&mut self) {
        self.client.forget_token();
    }

    /// Returns true only if both siren and strobe accepted the change.
    /// A partial failure is not rolled back.
    pub fn toggle_alarms(&mut self, state: AlarmState) -> bool {
        let status = state.as_str();

        if state == AlarmState::On {
            // Result ignored; arming proceeds either way.
            let _ = self.set(ABILITY_MOTION_DETECT, AlarmState::Off.as_str());
        }

        let siren = self.set(ABILITY_LINK_DEV_ALARM, status);
        let strobe = self.set(ABILITY_LINKAGE_WHITE_LIGHT, status);

        info!(
            "alarms {}: siren={} strobe={}",
            status.to_uppercase(),
            ok_or_fail(siren),
            ok_or_fail(strobe)
        );
        siren && strobe
    }

    fn set(&mut self, ability_type: &str, status: &str) -> bool {
        match self.client.call_ability(ability_type, status) {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!("{ability_type}={status} failed: {err}");
                false
            }
        }
    }
}

fn ok_or_fail(success: bool) -> &'static str {
    if success {
        "OK"
    } else {
        "FAIL"
    }
}
