/// Requirement names that only make sense on a host computer.
pub const HOST_ONLY_PACKAGES: [&str; 7] = [
    "",
    "adafruit-blinka",
    "adafruit-blinka-bleio",
    "adafruit-blinka-displayio",
    "adafruit-circuitpython-typing",
    "circuitpython_typing",
    "pyserial",
];

/// Requirement-derived names whose module is published under another name.
const NAME_ALIASES: [(&str, &str); 9] = [
    ("adafruit_adafruitio", "adafruit_io"),
    ("adafruit_asyncio", "asyncio"),
    ("adafruit_busdevice", "adafruit_bus_device"),
    ("adafruit_connectionmanager", "adafruit_connection_manager"),
    ("adafruit_display_button", "adafruit_button"),
    ("adafruit_neopixel", "neopixel"),
    ("adafruit_sd", "adafruit_sdcard"),
    ("adafruit_simpleio", "simpleio"),
    ("pimoroni_ltr559", "pimoroni_circuitpython_ltr559"),
];

/// Modules compiled into the device runtime, plus host-side names that
/// programs import under a guard.
const PLATFORM_BUILTINS: &[&str] = &[
    "__future__",
    "_bleio",
    "alarm",
    "analogbufio",
    "analogio",
    "array",
    "audiobusio",
    "audiocore",
    "audioio",
    "audiomixer",
    "audiomp3",
    "audiopwmio",
    "binascii",
    "bitbangio",
    "bitmaptools",
    "bitops",
    "board",
    "builtins",
    "busdisplay",
    "busio",
    "camera",
    "canio",
    "codeop",
    "collections",
    "countio",
    "digitalio",
    "displayio",
    "dualbank",
    "epaperdisplay",
    "errno",
    "espidf",
    "espnow",
    "fontio",
    "fourwire",
    "framebufferio",
    "frequencyio",
    "gc",
    "getpass",
    "gifio",
    "hashlib",
    "i2cdisplaybus",
    "i2ctarget",
    "imagecapture",
    "io",
    "ipaddress",
    "jpegio",
    "json",
    "keypad",
    "locale",
    "math",
    "mdns",
    "memorymap",
    "microcontroller",
    "micropython",
    "msgpack",
    "neopixel_write",
    "nvm",
    "onewireio",
    "os",
    "paralleldisplaybus",
    "ps2io",
    "pulseio",
    "pwmio",
    "qrio",
    "rainbowio",
    "random",
    "re",
    "rgbmatrix",
    "rotaryio",
    "rp2pio",
    "rtc",
    "sdcardio",
    "sdioio",
    "select",
    "sharpdisplay",
    "socketpool",
    "ssl",
    "storage",
    "struct",
    "supervisor",
    "synthio",
    "sys",
    "terminalio",
    "time",
    "touchio",
    "traceback",
    "typing",
    "ulab",
    "usb",
    "usb_cdc",
    "usb_hid",
    "usb_midi",
    "ustack",
    "vectorio",
    "warnings",
    "watchdog",
    "wifi",
    "zlib",
];

pub fn is_platform_builtin(name: &str) -> bool {
    PLATFORM_BUILTINS.binary_search(&name).is_ok()
}

/// Module name for a requirement-style name, or `None` for host-only
/// packages. `adafruit-circuitpython-display-text` becomes
/// `adafruit_display_text`.
pub fn canonicalize_requirement_name(raw: &str) -> Option<String> {
    let mut name = raw.trim().to_ascii_lowercase();
    if HOST_ONLY_PACKAGES.contains(&name.as_str()) {
        return None;
    }

    if name.contains("circuitpython") {
        name = name
            .replace("-circuitpython-", "_")
            .replace("_circuitpython_", "_")
            .replace('-', "_");
    }

    if let Some((_, actual)) = NAME_ALIASES.iter().find(|(assumed, _)| *assumed == name) {
        name = (*actual).to_string();
    }
    Some(name)
}
