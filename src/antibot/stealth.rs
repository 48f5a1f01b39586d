/// Scripts that hide browser automation from fingerprinting.
///
/// The preload script runs before any page script on every new document; the
/// page script patches the live page once it has loaded.
pub trait StealthProvider: Send + Sync {
    fn name(&self) -> &str;

    fn preload_script(&self) -> Option<&str>;

    fn page_script(&self) -> Option<&str>;
}

/// Patches tuned for Kasada-protected Australian sites.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromeStealth;

impl StealthProvider for ChromeStealth {
    fn name(&self) -> &str {
        "chrome-stealth"
    }

    fn preload_script(&self) -> Option<&str> {
        Some(PRELOAD_SCRIPT)
    }

    fn page_script(&self) -> Option<&str> {
        Some(PAGE_SCRIPT)
    }
}

/// Leaves the browser as launched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStealth;

impl StealthProvider for NoStealth {
    fn name(&self) -> &str {
        "none"
    }

    fn preload_script(&self) -> Option<&str> {
        None
    }

    fn page_script(&self) -> Option<&str> {
        None
    }
}

const PRELOAD_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', {
    get: () => undefined,
    configurable: true
});

const frameWindow = Object.getOwnPropertyDescriptor(HTMLIFrameElement.prototype, 'contentWindow');
Object.defineProperty(HTMLIFrameElement.prototype, 'contentWindow', {
    get: function() {
        const win = frameWindow.get.call(this);
        if (win) {
            try {
                Object.defineProperty(win.navigator, 'webdriver', {
                    get: () => undefined,
                    configurable: true
                });
            } catch (e) {}
        }
        return win;
    }
});

const nativeToString = Function.prototype.toString;
Function.prototype.toString = function() {
    if (this === Function.prototype.toString) {
        return 'function toString() { [native code] }';
    }
    return nativeToString.call(this);
};
"#;

const PAGE_SCRIPT: &str = r#"
try {
    Object.defineProperty(navigator, 'webdriver', {get: () => undefined});
    delete Object.getPrototypeOf(navigator).webdriver;

    Object.defineProperty(navigator, 'languages', {get: () => ['en-AU', 'en-US', 'en']});
    Object.defineProperty(navigator, 'language', {get: () => 'en-AU'});

    if (!window.chrome) {
        window.chrome = {
            runtime: {
                onMessage: { addListener: function() {} },
                onConnect: { addListener: function() {} }
            },
            loadTimes: function() { return {}; },
            csi: function() { return {}; },
            app: { isInstalled: false }
        };
    }

    Object.defineProperty(navigator, 'plugins', {
        get: () => {
            const list = [
                { name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer', description: 'Portable Document Format' },
                { name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai', description: '' },
                { name: 'Native Client', filename: 'internal-nacl-plugin', description: '' }
            ];
            list.item = (i) => list[i] || null;
            list.namedItem = (name) => list.find(p => p.name === name) || null;
            list.refresh = () => {};
            return list;
        }
    });

    const query = window.navigator.permissions.query;
    window.navigator.permissions.query = (parameters) => (
        parameters.name === 'notifications'
            ? Promise.resolve({ state: Notification.permission })
            : query(parameters)
    );

    const getParameter = WebGLRenderingContext.prototype.getParameter;
    WebGLRenderingContext.prototype.getParameter = function(parameter) {
        if (parameter === 37445) return 'Intel Inc.';
        if (parameter === 37446) return 'Intel Iris OpenGL Engine';
        return getParameter.call(this, parameter);
    };
} catch (e) {}
true;
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chrome_stealth_hides_webdriver_before_page_scripts() {
        let stealth = ChromeStealth;
        assert!(stealth.preload_script().unwrap().contains("'webdriver'"));
        assert!(stealth.page_script().unwrap().contains("en-AU"));
    }

    #[test]
    fn no_stealth_injects_nothing() {
        assert!(NoStealth.preload_script().is_none());
        assert!(NoStealth.page_script().is_none());
    }
}
