//! Deterministic summary used when no generator can be called.

use super::SummaryContext;

/// Short English description of a WMO weather code.
pub fn describe(code: i32) -> &'static str {
    match code {
        0 => "clear skies",
        1 => "mostly clear skies",
        2 => "partly cloudy skies",
        3 => "overcast skies",
        45 | 48 => "fog",
        51 | 53 | 55 => "drizzle",
        56 | 57 => "freezing drizzle",
        61 => "light rain",
        63 => "rain",
        65 => "heavy rain",
        66 | 67 => "freezing rain",
        71 | 73 | 75 | 77 => "snow",
        80 | 81 => "rain showers",
        82 => "violent rain showers",
        85 | 86 => "snow showers",
        95 => "thunderstorms",
        96 | 99 => "thunderstorms with hail",
        _ => "changeable weather",
    }
}

fn is_wet(code: i32) -> bool {
    code >= 51
}

/// Render the fallback summary, or `None` when there is no location name
/// to write it about.
pub fn render(ctx: &SummaryContext) -> Option<String> {
    let name = ctx.location_name.trim();
    if name.is_empty() {
        return None;
    }

    let c = &ctx.current;
    let mut text = format!(
        "{name}: {:.0}°C (feels like {:.0}°C) with {} during the {}.",
        c.temperature,
        c.apparent_temperature,
        describe(c.weather_code),
        ctx.season.label(),
    );

    if let Some(daily) = &ctx.daily {
        if let (Some(lo), Some(hi)) = (daily.temperature_min.first(), daily.temperature_max.first()) {
            let chance = daily.precipitation_probability_max.first().copied().unwrap_or(0.0);
            text.push_str(&format!(" Today ranges {lo:.0}–{hi:.0}°C with a {chance:.0}% chance of rain."));
        }
    }

    if !ctx.activities.is_empty() {
        let activities = ctx.activities.join(", ");
        let advice = if is_wet(c.weather_code) {
            format!(" Pack rain gear if you are planning {activities}.")
        } else if c.temperature >= 32.0 {
            format!(" Plan {activities} for early morning or late afternoon to avoid the heat.")
        } else {
            format!(" Conditions suit {activities}.")
        };
        text.push_str(&advice);
    }

    Some(text)
}
