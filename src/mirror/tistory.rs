//! Tistory blog mirror driven through a WebDriver session.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::sleep;

use super::{BlogMirror, MirrorPost};
use crate::browser::{wait_until, Locator, Session, DEFAULT_POLL_INTERVAL};

const KAKAO_LOGIN_URL: &str = "https://accounts.kakao.com/login/?continue=https%3A%2F%2Fkauth.kakao.com%2Foauth%2Fauthorize%3Fclient_id%3D3e6ddd834b023f24221217e370daed18%26prompt%3Dselect_account%26redirect_uri%3Dhttps%253A%252F%252Fwww.tistory.com%252Fauth%252Fkakao%252Fredirect%26response_type%3Dcode";

const SAVED_DRAFT_ALERT: &str = "저장된 글이 있습니다";

#[derive(Clone)]
pub struct TistoryCredentials {
    pub blog_name: String,
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for TistoryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TistoryCredentials")
            .field("blog_name", &self.blog_name)
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

pub struct TistoryMirror {
    driver_url: String,
    creds: TistoryCredentials,
}

/// Title as shown on the blog: `[tag1,tag2]title`.
pub fn post_title(post: &MirrorPost) -> String {
    format!("[{}]{}", post.tags.join(","), post.title)
}

/// Post body with the trailing source link.
pub fn post_body(post: &MirrorPost) -> String {
    if post.source_url.is_empty() {
        return post.html.clone();
    }
    let href = html_escape::encode_double_quoted_attribute(&post.source_url);
    let text = html_escape::encode_text(&post.source_url);
    format!(
        "{}<br><p><b>출처:</b> <a href=\"{href}\" target=\"_blank\" rel=\"noopener noreferrer\">{text}</a></p>",
        post.html
    )
}

fn category_option_xpath(category: &str) -> String {
    format!("//div[@role='option'][span/text()='{category}']")
}

impl TistoryMirror {
    pub fn new(driver_url: impl Into<String>, creds: TistoryCredentials) -> Self {
        Self {
            driver_url: driver_url.into(),
            creds,
        }
    }

    async fn login(&self, s: &Session) -> Result<()> {
        s.goto(KAKAO_LOGIN_URL).await?;
        let id = s
            .wait_for(Locator::Css("input[name='loginId']"), Duration::from_secs(10))
            .await
            .context("kakao login form")?;
        s.send_keys(&id, &self.creds.email).await?;
        let pw = s.find(Locator::Css("input[name='password']")).await?;
        s.send_keys(&pw, &self.creds.password).await?;
        let submit = s
            .wait_for(
                Locator::Css("button.btn_g.highlight.submit"),
                Duration::from_secs(10),
            )
            .await?;
        s.js_click(&submit).await?;

        // Intermediate tistory page only shows up on some logins.
        match s
            .wait_for(
                Locator::XPath("//*[contains(text(), '카카오계정으로 로그인')]"),
                Duration::from_secs(10),
            )
            .await
        {
            Ok(btn) => s.js_click(&btn).await?,
            Err(_) => tracing::debug!("no intermediate tistory login page"),
        }
        Ok(())
    }

    async fn open_editor(&self, s: &Session) -> Result<()> {
        let blog = &self.creds.blog_name;
        s.goto(&format!("https://{blog}.tistory.com/manage")).await?;
        s.wait_for_url(&format!("{blog}.tistory.com/manage"), Duration::from_secs(20))
            .await?;
        s.wait_for(Locator::Css("#kakaoServiceLogo"), Duration::from_secs(20))
            .await
            .context("manage page did not load")?;
        sleep(Duration::from_secs(3)).await;

        s.goto(&format!("https://{blog}.tistory.com/manage/newpost"))
            .await?;

        let alert = wait_until(
            "saved draft alert",
            Duration::from_secs(7),
            DEFAULT_POLL_INTERVAL,
            || s.alert_text(),
        )
        .await;
        if let Ok(text) = alert {
            if text.contains(SAVED_DRAFT_ALERT) {
                s.dismiss_alert().await?;
            } else {
                tracing::warn!(alert = %text, "unexpected alert on editor page; accepting");
                s.accept_alert().await?;
            }
            sleep(Duration::from_millis(500)).await;
        }

        s.wait_for_url("/manage/newpost", Duration::from_secs(15))
            .await?;
        Ok(())
    }

    async fn choose_category(&self, s: &Session, category: &str) -> Result<()> {
        let btn = s
            .wait_for(Locator::Css("#category-btn"), Duration::from_secs(10))
            .await?;
        s.click(&btn).await?;
        let xpath = category_option_xpath(category);
        let opt = s
            .wait_for(Locator::XPath(&xpath), Duration::from_secs(10))
            .await?;
        s.click(&opt).await?;
        sleep(Duration::from_secs(1)).await;
        Ok(())
    }

    async fn fill_body(&self, s: &Session, html: &str) -> Result<()> {
        let frame = s
            .wait_for(Locator::Css("#editor-tistory_ifr"), Duration::from_secs(20))
            .await?;
        s.switch_to_frame(&frame).await?;
        let res = async {
            let body = s
                .wait_for(Locator::Css("#tinymce"), Duration::from_secs(10))
                .await?;
            s.set_inner_html(&body, html).await?;
            // The editor only picks up injected content once focused.
            s.click(&body).await?;
            sleep(Duration::from_secs(1)).await;
            Ok::<_, anyhow::Error>(())
        }
        .await;
        s.switch_to_top().await?;
        res
    }

    async fn fill_tags(&self, s: &Session, tags: &str) -> Result<()> {
        let input = s
            .wait_for(Locator::Css("#tagText"), Duration::from_secs(10))
            .await?;
        s.send_keys(&input, tags).await?;
        sleep(Duration::from_secs(1)).await;
        Ok(())
    }

    async fn submit(&self, s: &Session) -> Result<()> {
        let open = s
            .wait_for(Locator::Css("#publish-layer-btn"), Duration::from_secs(10))
            .await?;
        s.click(&open).await?;
        s.wait_for(Locator::Css("div.editor_layer"), Duration::from_secs(10))
            .await
            .context("publish layer")?;
        let public = s
            .wait_for(Locator::Css("#open20"), Duration::from_secs(10))
            .await?;
        s.click(&public).await?;
        sleep(Duration::from_secs(1)).await;
        let confirm = s
            .wait_for(Locator::Css("#publish-btn"), Duration::from_secs(10))
            .await?;
        s.click(&confirm).await?;
        s.wait_for_url("/manage/posts/", Duration::from_secs(30))
            .await
            .context("post list after publish")?;
        Ok(())
    }

    async fn run(&self, s: &Session, post: &MirrorPost) -> Result<()> {
        self.login(s).await.context("login")?;
        self.open_editor(s).await.context("editor")?;

        let title_input = s
            .wait_for(Locator::Css("#post-title-inp"), Duration::from_secs(20))
            .await
            .context("title input")?;

        if let Err(e) = self.choose_category(s, &post.category).await {
            tracing::warn!(category = %post.category, error = %format!("{e:#}"), "category selection failed; posting uncategorised");
        }

        s.send_keys(&title_input, &post_title(post)).await?;
        sleep(Duration::from_secs(1)).await;

        self.fill_body(s, &post_body(post))
            .await
            .context("body")?;

        if let Err(e) = self.fill_tags(s, &post.tags.join(",")).await {
            tracing::warn!(error = %format!("{e:#}"), "tag input failed; posting without tags");
        }

        self.submit(s).await.context("publish")
    }
}

#[async_trait::async_trait]
impl BlogMirror for TistoryMirror {
    async fn publish(&self, post: &MirrorPost) -> Result<()> {
        tracing::info!(title = %post.title, category = %post.category, "mirroring post to blog");
        let session = Session::start(&self.driver_url).await?;
        let res = self.run(&session, post).await;
        if res.is_err() {
            if let Ok(url) = session.current_url().await {
                tracing::debug!(%url, "blog mirror failed at");
            }
        }
        session.quit().await;
        res
    }
}
