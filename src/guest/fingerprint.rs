//! Device identifier sent with guest registration.
//!
//! This is an abuse/duplicate-detection signal, not a security credential:
//! the server uses it to spot the same device registering under many names.
//! The embedder supplies a [`DeviceProfile`] describing the host; the
//! identifier is a deterministic 32-bit rolling hash of its fields, rendered
//! as lowercase hex.

/// Host characteristics feeding the device identifier. The crate never
/// inspects the platform itself; whoever embeds it fills this in from
/// whatever display/locale APIs the target has.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub user_agent: String,
    pub language: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub timezone_offset_minutes: i32,
    /// Opaque rendering signature (e.g. a canvas data URL on web targets).
    pub canvas_signature: String,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            user_agent: "unknown".to_string(),
            language: "en".to_string(),
            screen_width: 0,
            screen_height: 0,
            timezone_offset_minutes: 0,
            canvas_signature: String::new(),
        }
    }
}

#[must_use]
pub fn device_identifier(profile: &DeviceProfile) -> String {
    let joined = format!(
        "{}|{}|{}|{}|{}|{}",
        profile.user_agent,
        profile.language,
        profile.screen_width,
        profile.screen_height,
        profile.timezone_offset_minutes,
        profile.canvas_signature,
    );

    let mut hash: i32 = 0;
    for ch in joined.chars() {
        hash = hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(ch as i32);
    }

    format!("{:x}", hash.unsigned_abs())
}
