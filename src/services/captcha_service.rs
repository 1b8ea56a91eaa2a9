//! 验证码服务 - 业务能力层
//!
//! 负责签发和校验验证码：
//! - 远端验证码（直连 / 中继）只登记来源，真正的校验由门户完成
//! - 本地验证码在远端全部不可用时兜底，明文只保存在会话存储里

use std::fmt::Debug;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AppResult, CaptchaError};
use crate::infrastructure::{Clock, SessionStore, SessionStoreExt};
use crate::models::session::captcha_key;
use crate::models::{CaptchaChallenge, ImageData, Strategy};
use crate::services::glyphs::{self, GLYPH_HEIGHT, GLYPH_WIDTH};

const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// 远端验证码在本地只要求的最小长度
const REMOTE_MIN_LEN: usize = 4;

/// 把验证码文本画成图片
pub trait CaptchaRenderer: Send + Sync + Debug {
    fn render(&self, code: &str) -> AppResult<ImageData>;
}

/// 白底、灰色干扰线、字符位置随机抖动的 PNG 图片
#[derive(Debug, Clone)]
pub struct RasterRenderer {
    pub width: u32,
    pub height: u32,
    pub noise_lines: usize,
    /// 字形放大倍数
    pub scale: u32,
}

impl Default for RasterRenderer {
    fn default() -> Self {
        Self {
            width: 200,
            height: 60,
            noise_lines: 5,
            scale: 3,
        }
    }
}

impl RasterRenderer {
    const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
    const NOISE: Rgb<u8> = Rgb([200, 200, 200]);
    const TEXT: Rgb<u8> = Rgb([50, 50, 50]);

    fn draw_line(img: &mut RgbImage, from: (i64, i64), to: (i64, i64), color: Rgb<u8>) {
        let (mut x0, mut y0) = from;
        let (x1, y1) = to;
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            if x0 >= 0 && y0 >= 0 && (x0 as u32) < img.width() && (y0 as u32) < img.height() {
                img.put_pixel(x0 as u32, y0 as u32, color);
            }
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    fn draw_glyph(&self, img: &mut RgbImage, c: char, left: u32, top: u32) {
        let Some(rows) = glyphs::glyph(c) else {
            return;
        };
        for row in 0..GLYPH_HEIGHT {
            for col in 0..GLYPH_WIDTH {
                if !glyphs::is_set(rows, col, row) {
                    continue;
                }
                for dy in 0..self.scale {
                    for dx in 0..self.scale {
                        let x = left + col * self.scale + dx;
                        let y = top + row * self.scale + dy;
                        if x < img.width() && y < img.height() {
                            img.put_pixel(x, y, Self::TEXT);
                        }
                    }
                }
            }
        }
    }
}

impl CaptchaRenderer for RasterRenderer {
    fn render(&self, code: &str) -> AppResult<ImageData> {
        let mut rng = rand::thread_rng();
        let mut img = RgbImage::from_pixel(self.width, self.height, Self::BACKGROUND);
        let (w, h) = (self.width as i64, self.height as i64);

        for _ in 0..self.noise_lines {
            let from = (rng.gen_range(0..w), rng.gen_range(0..h));
            let to = (rng.gen_range(0..w), rng.gen_range(0..h));
            Self::draw_line(&mut img, from, to, Self::NOISE);
        }

        let count = code.chars().count().max(1) as u32;
        let step = ((self.width.saturating_sub(20)) / count).min(30);
        let glyph_h = GLYPH_HEIGHT * self.scale;
        let base_top = self.height.saturating_sub(glyph_h) / 2;
        for (i, c) in code.chars().enumerate() {
            let left = 10 + step * i as u32;
            let jitter: i64 = rng.gen_range(-5..=5);
            let top = (base_top as i64 + jitter).max(0) as u32;
            self.draw_glyph(&mut img, c, left, top);
        }

        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| CaptchaError::Render {
                message: e.to_string(),
            })?;
        Ok(ImageData::new("image/png", bytes))
    }
}

/// 会话存储中保存的验证码状态
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IssuedCaptcha {
    source: Strategy,
    /// 只有本地验证码才有
    code: Option<String>,
    issued_at: DateTime<Utc>,
    ttl_secs: u64,
}

/// 验证码服务
///
/// 每个会话键同时只有一个有效的验证码，校验一次后立即作废。
#[derive(Debug)]
pub struct CaptchaService {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    renderer: Box<dyn CaptchaRenderer>,
    length: usize,
    ttl: Duration,
}

impl CaptchaService {
    /// # 参数
    /// - `store`: 会话存储
    /// - `clock`: 时钟
    /// - `length`: 本地验证码长度
    /// - `ttl`: 本地验证码有效期
    pub fn new(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        length: usize,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            renderer: Box::new(RasterRenderer::default()),
            length,
            ttl,
        }
    }

    /// 替换图片渲染器
    pub fn with_renderer(mut self, renderer: Box<dyn CaptchaRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// 生成随机验证码（A-Z0-9）
    pub fn generate_code(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.length)
            .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
            .collect()
    }

    /// 签发本地验证码
    ///
    /// # 参数
    /// - `session_key`: 会话键
    /// - `notice`: 远端失败的说明，原样放进挑战里
    ///
    /// # 返回
    /// 只包含图片的挑战，明文不会返回
    pub fn issue_local(&self, session_key: &str, notice: Option<String>) -> AppResult<CaptchaChallenge> {
        let code = self.generate_code();
        let image = self.renderer.render(&code)?;
        let issued_at = self.clock.now();

        let issued = IssuedCaptcha {
            source: Strategy::Local,
            code: Some(code),
            issued_at,
            ttl_secs: self.ttl.as_secs(),
        };
        // 存储里多留一倍时间，这样过期后校验得到的是 Expired 而不是 NotFound
        self.store
            .put_json(&captcha_key(session_key), &issued, self.ttl * 2)?;
        info!("🔐 已生成本地验证码 (会话 {})", session_key);

        Ok(CaptchaChallenge {
            image,
            source: Strategy::Local,
            session_key: session_key.to_string(),
            relay_token: None,
            issued_at,
            ttl_secs: self.ttl.as_secs(),
            notice,
        })
    }

    /// 登记远端验证码
    ///
    /// # 返回
    /// 签发时间
    pub fn register_remote(
        &self,
        session_key: &str,
        source: Strategy,
        ttl: Duration,
    ) -> AppResult<DateTime<Utc>> {
        let issued_at = self.clock.now();
        let issued = IssuedCaptcha {
            source,
            code: None,
            issued_at,
            ttl_secs: ttl.as_secs(),
        };
        self.store.put_json(&captcha_key(session_key), &issued, ttl)?;
        debug!("登记远端验证码: {} (来源 {})", session_key, source);
        Ok(issued_at)
    }

    /// 校验验证码
    ///
    /// 无论成功与否，验证码都会被作废。
    ///
    /// # 返回
    /// 验证码的来源
    pub fn validate(&self, session_key: &str, text: &str) -> AppResult<Strategy> {
        let issued: IssuedCaptcha = self
            .store
            .take_json(&captcha_key(session_key))?
            .ok_or_else(|| CaptchaError::NotFound {
                key: session_key.to_string(),
            })?;
        let text = text.trim();

        if issued.source.is_remote() {
            if text.chars().count() < REMOTE_MIN_LEN {
                return Err(CaptchaError::Malformed {
                    reason: format!("至少需要 {} 个字符", REMOTE_MIN_LEN),
                }
                .into());
            }
            return Ok(issued.source);
        }

        let age = self.clock.now() - issued.issued_at;
        if age > ChronoDuration::seconds(issued.ttl_secs as i64) {
            warn!("⚠️ 本地验证码已过期 (会话 {})", session_key);
            return Err(CaptchaError::Expired {
                age_secs: age.num_seconds(),
                ttl_secs: issued.ttl_secs,
            }
            .into());
        }
        match issued.code {
            Some(code) if code.eq_ignore_ascii_case(text) => Ok(Strategy::Local),
            _ => Err(CaptchaError::Mismatch.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, ErrorKind};
    use crate::infrastructure::{ManualClock, MemorySessionStore};

    fn service() -> (Arc<ManualClock>, Arc<MemorySessionStore>, CaptchaService) {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemorySessionStore::new(clock.clone()));
        let service = CaptchaService::new(store.clone(), clock.clone(), 6, Duration::from_secs(300));
        (clock, store, service)
    }

    fn stored_code(store: &MemorySessionStore, key: &str) -> String {
        let issued: IssuedCaptcha = store.get_json(&captcha_key(key)).unwrap().unwrap();
        issued.code.unwrap()
    }

    #[test]
    fn test_generate_code_charset() {
        let (_, _, service) = service();
        let code = service.generate_code();
        assert_eq!(code.len(), 6);
        assert!(code.bytes().all(|b| CHARSET.contains(&b)));
    }

    #[test]
    fn test_local_captcha_is_single_use() {
        let (_, store, service) = service();
        let challenge = service.issue_local("k1", None).unwrap();
        assert_eq!(challenge.source, Strategy::Local);
        assert_eq!(challenge.ttl_secs, 300);
        let code = stored_code(&store, "k1");

        assert_eq!(service.validate("k1", &code.to_lowercase()).unwrap(), Strategy::Local);
        let err = service.validate("k1", &code).unwrap_err();
        assert!(matches!(err, AppError::Captcha(CaptchaError::NotFound { .. })));
    }

    #[test]
    fn test_failed_attempt_also_consumes() {
        let (_, store, service) = service();
        service.issue_local("k1", None).unwrap();
        let code = stored_code(&store, "k1");

        let err = service.validate("k1", "WRONG!").unwrap_err();
        assert!(matches!(err, AppError::Captcha(CaptchaError::Mismatch)));
        assert!(service.validate("k1", &code).is_err());
    }

    #[test]
    fn test_local_captcha_expires() {
        let (clock, store, service) = service();
        service.issue_local("k1", None).unwrap();
        let code = stored_code(&store, "k1");

        clock.advance(Duration::from_secs(301));
        let err = service.validate("k1", &code).unwrap_err();
        assert!(matches!(err, AppError::Captcha(CaptchaError::Expired { .. })));
        assert_eq!(err.kind(), ErrorKind::Captcha);
    }

    #[test]
    fn test_local_captcha_expires_within_last_second() {
        let (clock, store, service) = service();
        service.issue_local("k1", None).unwrap();
        let code = stored_code(&store, "k1");

        clock.advance(Duration::from_millis(300_500));
        let err = service.validate("k1", &code).unwrap_err();
        assert!(matches!(err, AppError::Captcha(CaptchaError::Expired { .. })));
    }

    #[test]
    fn test_local_captcha_valid_at_ttl_boundary() {
        let (clock, store, service) = service();
        service.issue_local("k1", None).unwrap();
        let code = stored_code(&store, "k1");

        clock.advance(Duration::from_secs(300));
        assert!(service.validate("k1", &format!("  {}  ", code)).is_ok());
    }

    #[test]
    fn test_remote_captcha_is_permissive() {
        let (_, _, service) = service();
        service
            .register_remote("k1", Strategy::Direct, Duration::from_secs(600))
            .unwrap();
        assert_eq!(service.validate("k1", "ab1c").unwrap(), Strategy::Direct);

        service
            .register_remote("k2", Strategy::Proxy, Duration::from_secs(600))
            .unwrap();
        let err = service.validate("k2", "ab1").unwrap_err();
        assert!(matches!(err, AppError::Captcha(CaptchaError::Malformed { .. })));
        assert!(service.validate("k2", "ab1c").is_err());
    }

    #[test]
    fn test_rendered_image_is_png() {
        let image = RasterRenderer::default().render("AB12CD").unwrap();
        assert_eq!(image.mime, "image/png");
        let decoded = image::load_from_memory(&image.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (200, 60));
        assert!(image.to_data_uri().starts_with("data:image/png;base64,"));
    }
}
