use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClientCommand {
    Status,
    CurrentTemp,
    AcStatus,
    AcPermStatus,
    TurnOnAc,
    TurnOffAc,
    TogglePermission,
    GetThresholds,
    SetThresholds { max: f32, min: f32 },
    SetBrightness(u8),
    ResetNode,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Silent,
    Disconnect,
}

impl Reply {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    Unknown(String),
    #[error("Invalid format: use setTemps:max,min")]
    BadThresholdFormat,
    #[error("Invalid format: use setBrightness:0-100")]
    BadBrightnessFormat,
    #[error("Invalid thresholds: max {max:.1} must be greater than min {min:.1}")]
    InvalidThresholds { max: f32, min: f32 },
    #[error("Rejected - AC not allowed")]
    NotPermitted,
    #[error("Failed - AC_Interface not responding")]
    RelayUnavailable,
}

impl FromStr for ClientCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();

        if let Some(args) = line.strip_prefix("setTemps:") {
            return parse_thresholds(args);
        }
        if let Some(args) = line.strip_prefix("setBrightness:") {
            return parse_brightness(args);
        }

        match line {
            "status" => Ok(Self::Status),
            "current_temp" => Ok(Self::CurrentTemp),
            "AC_Status" => Ok(Self::AcStatus),
            "AC_Perm_Status" => Ok(Self::AcPermStatus),
            "TurnOnAC" => Ok(Self::TurnOnAc),
            "TurnOffAC" => Ok(Self::TurnOffAc),
            "ToggleAC" => Ok(Self::TogglePermission),
            "getTemps" => Ok(Self::GetThresholds),
            "ResetNode" => Ok(Self::ResetNode),
            "shut_down" => Ok(Self::Shutdown),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

fn parse_thresholds(args: &str) -> Result<ClientCommand, CommandError> {
    let (max, min) = args
        .split_once(',')
        .ok_or(CommandError::BadThresholdFormat)?;
    let max = parse_finite(max).ok_or(CommandError::BadThresholdFormat)?;
    let min = parse_finite(min).ok_or(CommandError::BadThresholdFormat)?;
    Ok(ClientCommand::SetThresholds { max, min })
}

fn parse_brightness(args: &str) -> Result<ClientCommand, CommandError> {
    let level = args
        .trim()
        .parse::<i64>()
        .map_err(|_| CommandError::BadBrightnessFormat)?;
    Ok(ClientCommand::SetBrightness(level.clamp(0, 100) as u8))
}

fn parse_finite(value: &str) -> Option<f32> {
    value
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|value| value.is_finite())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_every_keyword() {
        let cases = [
            ("status", ClientCommand::Status),
            ("current_temp", ClientCommand::CurrentTemp),
            ("AC_Status", ClientCommand::AcStatus),
            ("AC_Perm_Status", ClientCommand::AcPermStatus),
            ("TurnOnAC", ClientCommand::TurnOnAc),
            ("TurnOffAC", ClientCommand::TurnOffAc),
            ("ToggleAC", ClientCommand::TogglePermission),
            ("getTemps", ClientCommand::GetThresholds),
            ("ResetNode", ClientCommand::ResetNode),
            ("shut_down", ClientCommand::Shutdown),
        ];
        for (line, expected) in cases {
            assert_eq!(line.parse::<ClientCommand>(), Ok(expected));
        }
    }

    #[test]
    fn parses_thresholds_with_spaces() {
        assert_eq!(
            "setTemps: 80,70.5".parse::<ClientCommand>(),
            Ok(ClientCommand::SetThresholds {
                max: 80.0,
                min: 70.5
            })
        );
    }

    #[test]
    fn threshold_format_errors() {
        for line in ["setTemps:80", "setTemps:a,b", "setTemps:", "setTemps:80,NaN"] {
            assert_eq!(
                line.parse::<ClientCommand>(),
                Err(CommandError::BadThresholdFormat),
                "{line}"
            );
        }
    }

    #[test]
    fn brightness_is_clamped() {
        assert_eq!(
            "setBrightness:250".parse::<ClientCommand>(),
            Ok(ClientCommand::SetBrightness(100))
        );
        assert_eq!(
            "setBrightness:-4".parse::<ClientCommand>(),
            Ok(ClientCommand::SetBrightness(0))
        );
        assert_eq!(
            "setBrightness:dim".parse::<ClientCommand>(),
            Err(CommandError::BadBrightnessFormat)
        );
    }

    #[test]
    fn unknown_command_echoes_the_line() {
        let err = "FlyToMoon".parse::<ClientCommand>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown command: FlyToMoon");
    }

    #[test]
    fn error_text_is_client_facing() {
        assert_eq!(
            CommandError::InvalidThresholds { max: 60.0, min: 80.0 }.to_string(),
            "Invalid thresholds: max 60.0 must be greater than min 80.0"
        );
        assert_eq!(
            CommandError::RelayUnavailable.to_string(),
            "Failed - AC_Interface not responding"
        );
    }
}
